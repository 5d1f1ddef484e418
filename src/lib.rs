//! # wpfleet
//!
//! Lifecycle automation for a fleet of self-hosted WordPress (Bedrock)
//! sites: local scaffolding, server provisioning, code deployment, and
//! backup/restore with retention.
//!
//! Every operation is safe to re-run. Provisioning steps report
//! `Created` or `AlreadyExists` instead of failing on existing resources,
//! and all state lives in plain files (a TOML site store and per-site
//! secret files) that each command reads and rewrites.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────┐   ┌──────────────────────────┐
//! │ site init │──▶│ site store │──▶│ provision                 │
//! │ template  │   │ sites.toml │   │ DNS → panel → vhost → restart
//! └───────────┘   └─────┬──────┘   └──────────────────────────┘
//!                       │
//!        ┌──────────────┼──────────────┬──────────────┐
//!        ▼              ▼              ▼              ▼
//!   ┌─────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//!   │ dns wait│   │  deploy  │   │  backup  │   │ db sync  │
//!   │  (dig)  │   │ (rsync)  │   │ (rclone) │   │ (wp-cli) │
//!   └─────────┘   └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! wpfleet site init acme --port 8081 --domain acme.com
//! wpfleet site set acme production ssh_host=203.0.113.10 ssh_user=deploy
//! wpfleet provision acme production
//! wpfleet dns wait acme production
//! wpfleet deploy acme production
//! wpfleet backup run acme production
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Fleet-wide TOML configuration |
//! | [`store`] | Per-site environment records |
//! | [`models`] | Environments, step outcomes, snapshots |
//! | [`error`] | Typed failure taxonomy |
//! | [`exec`] | Local and SSH command execution |
//! | [`secrets`] | Passwords and WordPress salts |
//! | [`template`] | `{{PLACEHOLDER}}` substitution |
//! | [`site_init`] | New-site scaffolding |
//! | [`dns`] | DNS record creation |
//! | [`panel`] | Hosting-panel adapter |
//! | [`vhost`] | Web-server virtual host |
//! | [`provision`] | Provisioning pipeline |
//! | [`dns_verify`] | DNS propagation gate |
//! | [`retry`] | Polling with interval and timeout |
//! | [`deploy`] | Code deployment |
//! | [`database`] | MySQL auth, dump and import |
//! | [`backup`] | Snapshots, retention, restore |
//! | [`sync`] | Database push/pull |
//! | [`prompt`] | Operator confirmation and password prompts |
//! | [`logging`] | Log subscriber setup |

pub mod backup;
pub mod config;
pub mod database;
pub mod deploy;
pub mod dns;
pub mod dns_verify;
pub mod error;
pub mod exec;
pub mod logging;
pub mod models;
pub mod panel;
pub mod prompt;
pub mod provision;
pub mod retry;
pub mod secrets;
pub mod site_init;
pub mod store;
pub mod sync;
pub mod template;
pub mod vhost;

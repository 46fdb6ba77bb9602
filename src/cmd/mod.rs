//! CLI command implementations.
//!
//! | Module    | Commands handled                 |
//! |-----------|----------------------------------|
//! | `run`     | no sub-command, `Code`           |
//! | `onboard` | `Onboard`                        |
//! | `config`  | `Config`                         |

pub mod config;
pub mod onboard;
pub mod run;

pub use config::cmd_config;
pub use onboard::cmd_onboard;
pub use run::run_council;

//! CLI command implementations.
//!
//! | Module     | Commands handled          |
//! |------------|---------------------------|
//! | `clone`    | `Clone`                   |
//! | `inspect`  | `Inspect`, `ParseLogs`    |
//! | `validate` | `Validate`                |
//! | `config`   | `Config`                  |

pub mod clone;
pub mod config;
pub mod inspect;
pub mod validate;

pub use clone::{CloneOptions, cmd_clone};
pub use config::cmd_config;
pub use inspect::{cmd_inspect, cmd_parse_logs};
pub use validate::cmd_validate;

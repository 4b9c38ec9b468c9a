//! Built-in sites, each described as a generic [`Configuration`].

pub mod mangapill;

use crate::generic::Configuration;

/// Every built-in site configuration, in listing order.
pub fn configurations() -> Vec<Configuration> {
    vec![mangapill::configuration()]
}

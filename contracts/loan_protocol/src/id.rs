//! Opaque identifiers for loans and investments.
//!
//! Each call draws a fresh v4 UUID from the OS random source; there is no
//! shared generator state.

use uuid::Uuid;

pub const LOAN_PREFIX: &str = "loan_";
pub const INVESTMENT_PREFIX: &str = "inv_";

pub fn new_loan_id() -> String {
    format!("{LOAN_PREFIX}{}", Uuid::new_v4())
}

pub fn new_investment_id() -> String {
    format!("{INVESTMENT_PREFIX}{}", Uuid::new_v4())
}

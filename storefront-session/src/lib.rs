//! Storefront session kit.
//!
//! The crate the mobile apps link against. Everything lives in
//! [`storefront_session_core`] and is re-exported here.

pub use storefront_session_core::*;

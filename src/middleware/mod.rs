//! Axum middleware layered over the control-plane router.

pub mod logging;

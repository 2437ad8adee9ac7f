//! # prdigest-channels
//!
//! Outbound delivery: the deterministic text→HTML renderer and the
//! SMTP email channel.

pub mod email;
pub mod render;

pub use email::EmailChannel;
pub use render::{html_escape, render_html};

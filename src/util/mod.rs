//! Small text helpers shared by the subscription list and the mailer.

mod text;

pub use text::{single_line, strip_control_chars};

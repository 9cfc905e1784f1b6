pub mod harness;

#[allow(unused_imports)]
pub use harness::{Harness, SmtpClient, bodies, sendgrid_responds, unisender_responds};

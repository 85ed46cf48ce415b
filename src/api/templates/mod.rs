pub mod network_templates;
pub mod otp_templates;

pub mod admin;
pub mod callback;
pub mod client_ip;
pub mod envelope;
pub mod health;
pub mod notify;
pub mod redeem;
pub mod scan;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

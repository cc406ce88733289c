pub mod assignment;
pub mod auth;
pub mod codes;
pub mod dispatch;
pub mod earnings;
pub mod ledger;
pub mod lifecycle;
pub mod proof;
pub mod registry;
pub mod scoring;

#[cfg(test)]
pub(crate) mod test_support;

pub mod lifecycle;
pub mod placement;
pub mod pricing;
pub mod reconciliation_engine;

#[cfg(test)]
pub mod test_support;

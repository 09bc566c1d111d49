mod decisions;
pub(crate) mod support;

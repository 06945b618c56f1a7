/// Splitting byte streams into lines.
pub mod lines;

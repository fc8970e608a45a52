//! Test harness for shell layout development.
//!
//! Provides programmatic tools for scripting layout runs, verifying the
//! scaffold at every step, and generating diagnostic output.
//!
//! # Key Components
//!
//! - [`LayoutBuilder`]: fluent API for building and verifying layouts
//! - [`oracle`]: verification functions returning pass/fail verdicts
//! - [`report`]: structured text layout descriptions
//! - [`helpers`]: error type, key layout fixtures, outline math
//! - [`assertions`]: rich assertion helpers with diagnostics

pub mod assertions;
pub mod helpers;
pub mod oracle;
pub mod report;
pub mod workflow;

pub use helpers::HarnessError;
pub use oracle::OracleVerdict;
pub use report::LayoutReport;
pub use workflow::LayoutBuilder;

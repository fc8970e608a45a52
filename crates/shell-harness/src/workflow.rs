//! LayoutBuilder: fluent API for scripting layout runs in tests.
//!
//! Drives `ShellPipeline::run` directly, so tests exercise the real stage
//! sequence. Keys are addressed by name instead of index for readability.

use shell_kernel::{AttachmentKind, Frame, Key, ShellConfig, ShellError, ShellLayout, ShellPipeline};

use crate::helpers::*;
use crate::oracle;

/// A fluent builder for assembling key layouts and verifying the scaffold
/// the pipeline produces for them.
pub struct LayoutBuilder {
    pub config: ShellConfig,
    keys: Vec<(String, Key)>,
    layout: Option<ShellLayout>,
    history: Vec<(String, String)>,
    auto_check: bool,
}

impl LayoutBuilder {
    pub fn new(config: ShellConfig) -> Self {
        Self {
            config,
            keys: Vec::new(),
            layout: None,
            history: Vec::new(),
            auto_check: false,
        }
    }

    pub fn basic() -> Self {
        Self::new(ShellConfig::basic())
    }

    pub fn stilts() -> Self {
        Self::new(ShellConfig::stilts())
    }

    pub fn tilted(tilt_deg: f64) -> Self {
        Self::new(ShellConfig::tilted(tilt_deg))
    }

    pub fn block() -> Self {
        Self::new(ShellConfig::block())
    }

    /// Enable auto-checking: after every build, run the structural oracles
    /// and fail on the first verdict that does not pass.
    pub fn with_auto_check(mut self) -> Self {
        self.auto_check = true;
        self
    }

    /// Change the configuration in place. Drops any built layout.
    pub fn configure(&mut self, f: impl FnOnce(&mut ShellConfig)) -> &mut Self {
        f(&mut self.config);
        self.invalidate("configure");
        self
    }

    // ── Key Editing ─────────────────────────────────────────────────────

    pub fn key(&mut self, name: &str, key: Key) -> Result<&mut Self, HarnessError> {
        self.check_name_available(name)?;
        self.keys.push((name.to_string(), key));
        self.invalidate("key");
        Ok(self)
    }

    /// Add one MX key at `(x, y, z)`.
    pub fn mx(&mut self, name: &str, x: f64, y: f64, z: f64) -> Result<&mut Self, HarnessError> {
        self.key(name, mx_at(x, y, z))
    }

    /// Add a grid of MX keys named `{prefix}{row}{col}`.
    pub fn grid(
        &mut self,
        prefix: &str,
        cols: usize,
        rows: usize,
        pitch: f64,
        z: f64,
    ) -> Result<&mut Self, HarnessError> {
        for (i, key) in key_grid(cols, rows, pitch, z).into_iter().enumerate() {
            self.key(&format!("{prefix}{}{}", i / cols, i % cols), key)?;
        }
        Ok(self)
    }

    /// Add unnamed keys; each is named `{prefix}{n}` by position.
    pub fn keys(&mut self, prefix: &str, keys: Vec<Key>) -> Result<&mut Self, HarnessError> {
        for (i, key) in keys.into_iter().enumerate() {
            self.key(&format!("{prefix}{i}"), key)?;
        }
        Ok(self)
    }

    pub fn remove_key(&mut self, name: &str) -> Result<&mut Self, HarnessError> {
        let i = self.key_index(name)?;
        self.keys.remove(i);
        self.invalidate("remove_key");
        Ok(self)
    }

    pub fn move_key(&mut self, name: &str, position: Frame) -> Result<&mut Self, HarnessError> {
        let i = self.key_index(name)?;
        self.keys[i].1.position = position;
        self.invalidate("move_key");
        Ok(self)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Index of a key in the pipeline input, which is also its key index in
    /// the layout.
    pub fn key_index(&self, name: &str) -> Result<usize, HarnessError> {
        self.keys
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| HarnessError::KeyNotFound {
                name: name.to_string(),
            })
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn key_list(&self) -> Vec<Key> {
        self.keys.iter().map(|(_, k)| k.clone()).collect()
    }

    pub fn layout(&self) -> Result<&ShellLayout, HarnessError> {
        self.layout.as_ref().ok_or(HarnessError::NotBuilt)
    }

    pub fn history(&self) -> &[(String, String)] {
        &self.history
    }

    // ── Running ─────────────────────────────────────────────────────────

    /// Run the pipeline on the current keys and keep the layout.
    pub fn build(&mut self) -> Result<&ShellLayout, HarnessError> {
        let result = ShellPipeline::new(self.config.clone()).run(&self.key_list());
        match result {
            Ok(layout) => {
                self.history.push(("build".into(), "ok".into()));
                if self.auto_check {
                    check_verdicts(&oracle::run_layout_checks(&layout))?;
                }
                Ok(self.layout.insert(layout))
            }
            Err(e) => {
                self.history.push(("build".into(), format!("{} failed", e.stage)));
                self.layout = None;
                Err(e.into())
            }
        }
    }

    // ── File I/O ────────────────────────────────────────────────────────

    /// The built layout as JSON.
    pub fn save(&self) -> Result<String, HarnessError> {
        Ok(self.layout()?.to_json()?)
    }

    /// Replace the built layout with one read from JSON.
    pub fn load(&mut self, json: &str) -> Result<&mut Self, HarnessError> {
        let layout = ShellLayout::from_json(json)?;
        self.layout = Some(layout);
        self.history.push(("load".into(), "ok".into()));
        Ok(self)
    }

    // ── Inline Assertions ───────────────────────────────────────────────

    pub fn assert_boundary_len(&self, min: usize, max: usize) -> Result<&Self, HarnessError> {
        let n = self.layout()?.boundary().len();
        if (min..=max).contains(&n) {
            Ok(self)
        } else {
            Err(HarnessError::AssertionFailed {
                detail: format!("expected {min}..={max} boundary points, got {n}"),
            })
        }
    }

    /// Assert the kernel's layout validator finds nothing wrong.
    pub fn assert_valid(&self) -> Result<&Self, HarnessError> {
        let verdict = oracle::check_validator(self.layout()?, &self.config);
        check_verdicts(std::slice::from_ref(&verdict))?;
        Ok(self)
    }

    pub fn assert_attachments_complete(&self) -> Result<&Self, HarnessError> {
        let verdict = oracle::check_attachments_placed(self.layout()?);
        check_verdicts(std::slice::from_ref(&verdict))?;
        Ok(self)
    }

    /// Assert that the given attachment category failed as unplaceable.
    pub fn assert_unplaceable(&self, kind: AttachmentKind) -> Result<&Self, HarnessError> {
        let layout = self.layout()?;
        let found = layout
            .attachments
            .errors()
            .iter()
            .any(|e| matches!(e, ShellError::Unplaceable { kind: k, .. } if *k == kind));
        if found {
            Ok(self)
        } else {
            Err(HarnessError::AssertionFailed {
                detail: format!(
                    "expected {kind} to be unplaceable, errors: {:?}",
                    layout.attachments.errors()
                ),
            })
        }
    }

    // ── Oracle Integration ──────────────────────────────────────────────

    /// Run every oracle on the built layout.
    pub fn check_layout(&self) -> Result<Vec<oracle::OracleVerdict>, HarnessError> {
        Ok(oracle::run_all_checks(self.layout()?, &self.config))
    }

    // ── Internal Helpers ────────────────────────────────────────────────

    fn check_name_available(&self, name: &str) -> Result<(), HarnessError> {
        if self.keys.iter().any(|(n, _)| n == name) {
            Err(HarnessError::DuplicateName {
                name: name.to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn invalidate(&mut self, action: &str) {
        if self.layout.take().is_some() {
            self.history.push((action.to_string(), "invalidated".to_string()));
        }
    }
}

/// First failing verdict as an error.
pub fn check_verdicts(verdicts: &[oracle::OracleVerdict]) -> Result<(), HarnessError> {
    match verdicts.iter().find(|v| !v.passed) {
        Some(v) => Err(HarnessError::OracleFailure {
            oracle: v.oracle_name.clone(),
            detail: v.detail.clone(),
        }),
        None => Ok(()),
    }
}

//! Resolved scopes
//!
//! Compiles the directives of every scope once, applies inheritance from the
//! enclosing scope and freezes the result. Compiled directive lists are
//! shared behind `Arc`, so an inheriting scope points at its parent's list
//! and requests never copy them.

use std::sync::Arc;

use crate::config::schema::{
    BlockDirective, DEFAULT_BLOCK_STATUS, GatewayConfig, LocationConfig, OneOrMany, Scalar,
};
use crate::error::ConfigError;
use crate::expr::CompiledExpr;

// ============================================================================
// ScopeConfig
// ============================================================================

/// A block rule: blocks with `status` when `condition` is a non-zero integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRule {
    /// Condition expression.
    pub condition: CompiledExpr,
    /// Status expression.
    pub status: CompiledExpr,
}

impl BlockRule {
    /// Creates a rule, defaulting the status to the literal `"503"`.
    #[must_use]
    pub fn new(condition: CompiledExpr, status: Option<CompiledExpr>) -> Self {
        Self {
            condition,
            status: status.unwrap_or_else(|| CompiledExpr::literal(DEFAULT_BLOCK_STATUS)),
        }
    }
}

/// The effective delay and block directives of one scope.
///
/// Immutable once built; cloning shares the underlying lists.
#[derive(Debug, Clone)]
pub struct ScopeConfig {
    delay_expressions: Arc<[CompiledExpr]>,
    block_rules: Arc<[BlockRule]>,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl ScopeConfig {
    /// Creates a scope from compiled directives.
    #[must_use]
    pub fn new(delay_expressions: Vec<CompiledExpr>, block_rules: Vec<BlockRule>) -> Self {
        Self {
            delay_expressions: delay_expressions.into(),
            block_rules: block_rules.into(),
        }
    }

    /// Delay expressions, in configured order.
    #[must_use]
    pub fn delay_expressions(&self) -> &[CompiledExpr] {
        &self.delay_expressions
    }

    /// Block rules, in configured order.
    #[must_use]
    pub fn block_rules(&self) -> &[BlockRule] {
        &self.block_rules
    }

    /// Whether the scope has neither delay nor block directives.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.delay_expressions.is_empty() && self.block_rules.is_empty()
    }

    /// Fills each empty directive list from `parent`.
    ///
    /// Delay expressions and block rules inherit independently; a block
    /// rule's condition and status always travel together.
    #[must_use]
    pub fn inherit(self, parent: &Self) -> Self {
        Self {
            delay_expressions: if self.delay_expressions.is_empty() {
                Arc::clone(&parent.delay_expressions)
            } else {
                self.delay_expressions
            },
            block_rules: if self.block_rules.is_empty() {
                Arc::clone(&parent.block_rules)
            } else {
                self.block_rules
            },
        }
    }

    /// Whether both scopes share the same directive lists.
    #[must_use]
    pub fn shares_lists_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.delay_expressions, &other.delay_expressions)
            && Arc::ptr_eq(&self.block_rules, &other.block_rules)
    }
}

// ============================================================================
// ScopeTree
// ============================================================================

/// All resolved scopes of a configuration, matched by longest path prefix.
#[derive(Debug, Clone)]
pub struct ScopeTree {
    root: Arc<ScopeConfig>,
    /// Sorted by descending prefix length.
    locations: Vec<(String, Arc<ScopeConfig>)>,
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self {
            root: Arc::new(ScopeConfig::default()),
            locations: Vec::new(),
        }
    }
}

impl ScopeTree {
    /// Compiles and resolves every scope of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidExpression`] if a directive argument
    /// does not compile.
    pub fn build(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let root = compile_scope(&config.sleep_ms, &config.block, "")?;
        let mut locations = Vec::new();
        collect_locations(&config.locations, &root, "locations", &mut locations)?;

        locations.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));

        Ok(Self {
            root: Arc::new(root),
            locations,
        })
    }

    /// Returns the scope whose path is the longest prefix of `path`.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Arc<ScopeConfig> {
        self.locations
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map_or_else(|| Arc::clone(&self.root), |(_, scope)| Arc::clone(scope))
    }

    /// The top-level scope.
    #[must_use]
    pub fn root(&self) -> &Arc<ScopeConfig> {
        &self.root
    }

    /// Number of location scopes (excluding the top level).
    #[must_use]
    pub fn location_count(&self) -> usize {
        self.locations.len()
    }
}

fn collect_locations(
    locations: &[LocationConfig],
    parent: &ScopeConfig,
    base_path: &str,
    out: &mut Vec<(String, Arc<ScopeConfig>)>,
) -> Result<(), ConfigError> {
    for (i, location) in locations.iter().enumerate() {
        let path = format!("{base_path}[{i}]");
        let scope = compile_scope(&location.sleep_ms, &location.block, &path)?.inherit(parent);
        collect_locations(
            &location.locations,
            &scope,
            &format!("{path}.locations"),
            out,
        )?;
        out.push((location.path.clone(), Arc::new(scope)));
    }
    Ok(())
}

fn compile_scope(
    sleep_ms: &OneOrMany<Scalar>,
    block: &OneOrMany<BlockDirective>,
    base_path: &str,
) -> Result<ScopeConfig, ConfigError> {
    let prefix = if base_path.is_empty() {
        String::new()
    } else {
        format!("{base_path}.")
    };

    let delays = sleep_ms
        .as_slice()
        .iter()
        .enumerate()
        .map(|(i, value)| compile(value, &format!("{prefix}sleep_ms[{i}]")))
        .collect::<Result<Vec<_>, _>>()?;

    let rules = block
        .as_slice()
        .iter()
        .enumerate()
        .map(|(i, directive)| {
            let condition = compile(&directive.when, &format!("{prefix}block[{i}].when"))?;
            let status = directive
                .status
                .as_ref()
                .map(|s| compile(s, &format!("{prefix}block[{i}].status")))
                .transpose()?;
            Ok(BlockRule::new(condition, status))
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(ScopeConfig::new(delays, rules))
}

fn compile(value: &Scalar, location: &str) -> Result<CompiledExpr, ConfigError> {
    CompiledExpr::compile(&value.as_text()).map_err(|source| ConfigError::InvalidExpression {
        location: location.to_string(),
        source,
    })
}

//! Directive (magic command) dispatch.
//!
//! A directive is a named handler registered against a kernel and invoked
//! when a submission's leading lines start with its name. Directive names
//! must begin with `#` or `%`; registering any other name is an argument
//! error at registration time, not at dispatch time.
//!
//! Recognition is limited to the leading run of lines of a submission:
//! directives are consumed in order of appearance until the first
//! non-directive line, and everything from that line on (including later
//! `#`-prefixed lines) is treated as code.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use replkit_protocols::Command;

use crate::error::{KernelError, KernelResult};
use crate::kernel::KernelScope;

/// One parsed directive occurrence within a submission.
#[derive(Debug, Clone)]
pub struct DirectiveInvocation {
    /// The directive name, including its `#`/`%` prefix.
    pub name: String,
    /// The remainder of the directive line after the name token.
    pub arguments: String,
    /// The nested command representing this directive occurrence.
    pub command: Command,
}

/// Handler invoked when a registered directive appears in a submission.
///
/// Handlers may publish events and submit further commands to the owning
/// kernel through the scope.
#[async_trait]
pub trait DirectiveHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        invocation: DirectiveInvocation,
        scope: &mut KernelScope<'_>,
    ) -> Result<(), KernelError>;
}

/// A directive line split out of a submission, before handler lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectiveLine {
    pub name: String,
    pub arguments: String,
}

/// Registry of directive handlers for one kernel.
#[derive(Default)]
pub struct DirectiveRegistry {
    handlers: HashMap<String, Arc<dyn DirectiveHandler>>,
}

impl DirectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`. Fails if the name does not start
    /// with `#` or `%`, or is already taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn DirectiveHandler>,
    ) -> KernelResult<()> {
        let name = name.into();
        if !name.starts_with('#') && !name.starts_with('%') {
            return Err(KernelError::InvalidDirectiveName(name));
        }
        if self.handlers.contains_key(&name) {
            return Err(KernelError::DuplicateDirective(name));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DirectiveHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

/// Split the leading directive lines off a submission.
///
/// Returns the directive lines in order of appearance and the remaining code.
/// Blank leading lines are skipped; a `#`/`%` line whose first token is not
/// a registered directive ends the leading run and stays in the code (it may
/// be a comment in the target language).
pub fn split_leading_directives(
    code: &str,
    is_directive: impl Fn(&str) -> bool,
) -> (Vec<DirectiveLine>, String) {
    let mut directives = Vec::new();
    let mut lines = code.lines().peekable();
    while let Some(line) = lines.peek() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            lines.next();
            continue;
        }
        let token = match trimmed.split_whitespace().next() {
            Some(token) if token.starts_with('#') || token.starts_with('%') => token,
            _ => break,
        };
        if !is_directive(token) {
            break;
        }
        directives.push(DirectiveLine {
            name: token.to_string(),
            arguments: trimmed[token.len()..].trim().to_string(),
        });
        lines.next();
    }
    let remainder = lines.collect::<Vec<_>>().join("\n");
    (directives, remainder)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopDirective;

    #[async_trait]
    impl DirectiveHandler for NoopDirective {
        async fn handle(
            &self,
            _invocation: DirectiveInvocation,
            _scope: &mut KernelScope<'_>,
        ) -> Result<(), KernelError> {
            Ok(())
        }
    }

    #[test]
    fn test_registration_requires_hash_or_percent_prefix() {
        let mut registry = DirectiveRegistry::new();
        let err = registry
            .register("hello", Arc::new(NoopDirective))
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidDirectiveName(_)));
        registry.register("#hello", Arc::new(NoopDirective)).unwrap();
        registry.register("%hello", Arc::new(NoopDirective)).unwrap();
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = DirectiveRegistry::new();
        registry.register("#time", Arc::new(NoopDirective)).unwrap();
        let err = registry
            .register("#time", Arc::new(NoopDirective))
            .unwrap_err();
        assert!(matches!(err, KernelError::DuplicateDirective(_)));
    }

    #[test]
    fn test_split_consumes_leading_directives_in_order() {
        let (directives, remainder) = split_leading_directives(
            "#time\n%about verbose\n1 + 1",
            |name| name == "#time" || name == "%about",
        );
        assert_eq!(
            directives,
            vec![
                DirectiveLine {
                    name: "#time".to_string(),
                    arguments: String::new()
                },
                DirectiveLine {
                    name: "%about".to_string(),
                    arguments: "verbose".to_string()
                },
            ]
        );
        assert_eq!(remainder, "1 + 1");
    }

    #[test]
    fn test_directive_after_code_stays_code() {
        let (directives, remainder) =
            split_leading_directives("1 + 1\n#time", |name| name == "#time");
        assert!(directives.is_empty());
        assert_eq!(remainder, "1 + 1\n#time");
    }

    #[test]
    fn test_unregistered_hash_line_is_code() {
        let (directives, remainder) = split_leading_directives("#comment\n2", |_| false);
        assert!(directives.is_empty());
        assert_eq!(remainder, "#comment\n2");
    }

    #[test]
    fn test_blank_leading_lines_are_skipped() {
        let (directives, remainder) =
            split_leading_directives("\n\n#time\n2 + 2", |name| name == "#time");
        assert_eq!(directives.len(), 1);
        assert_eq!(remainder, "2 + 2");
    }
}

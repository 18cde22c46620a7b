//! CEL expression compilation and evaluation.

use cel::{Context, Program, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::FilterError;

/// A compiled CEL program ready for evaluation.
#[derive(Clone)]
pub struct CelProgram {
    program: Arc<Program>,
    source: String,
    reads_tags: bool,
    reads_meta: bool,
}

impl std::fmt::Debug for CelProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CelProgram")
            .field("source", &self.source)
            .field("reads_tags", &self.reads_tags)
            .field("reads_meta", &self.reads_meta)
            .finish()
    }
}

/// Context for CEL evaluation (tags and element attributes).
pub struct CelContext<'a> {
    pub tags: &'a HashMap<String, String>,
    pub meta: &'a HashMap<String, String>,
}

impl CelProgram {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn reads_tags(&self) -> bool {
        self.reads_tags
    }

    pub fn reads_meta(&self) -> bool {
        self.reads_meta
    }
}

/// Compile a CEL expression string into a program.
pub fn compile_cel(source: &str) -> Result<CelProgram, FilterError> {
    let program = Program::compile(source).map_err(|e| FilterError::Compile {
        source_text: source.to_string(),
        message: e.to_string(),
    })?;

    let references = program.references();
    let reads_tags = references.has_variable("tags");
    let reads_meta = references.has_variable("meta");

    Ok(CelProgram {
        program: Arc::new(program),
        source: source.to_string(),
        reads_tags,
        reads_meta,
    })
}

/// Evaluate a compiled CEL program with the given context.
pub fn evaluate_cel(program: &CelProgram, ctx: &CelContext) -> Result<Value, FilterError> {
    let mut cel_ctx = Context::default();

    cel_ctx
        .add_variable("tags", ctx.tags.clone())
        .map_err(|e| FilterError::Cel(format!("context error: {}", e)))?;

    cel_ctx
        .add_variable("meta", ctx.meta.clone())
        .map_err(|e| FilterError::Cel(format!("context error: {}", e)))?;

    program
        .program
        .execute(&cel_ctx)
        .map_err(|e| FilterError::Cel(e.to_string()))
}

/// Evaluate a program that must produce a boolean.
pub fn evaluate_cel_predicate(program: &CelProgram, ctx: &CelContext) -> Result<bool, FilterError> {
    match evaluate_cel(program, ctx)? {
        Value::Bool(b) => Ok(b),
        other => Err(FilterError::NotBoolean(format!("{:?}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ctx<'a>(
        tags: &'a HashMap<String, String>,
        meta: &'a HashMap<String, String>,
    ) -> CelContext<'a> {
        CelContext { tags, meta }
    }

    #[test]
    fn test_tag_comparison() {
        let program = compile_cel("tags.highway == 'primary'").unwrap();

        let tags: HashMap<String, String> = [("highway".into(), "primary".into())].into();
        let meta = HashMap::new();
        let ctx = make_ctx(&tags, &meta);

        assert!(evaluate_cel_predicate(&program, &ctx).unwrap());
    }

    #[test]
    fn test_has_tag_native() {
        let program = compile_cel("'name' in tags").unwrap();

        let tags: HashMap<String, String> = [("name".into(), "Foo".into())].into();
        let meta = HashMap::new();
        let ctx = make_ctx(&tags, &meta);

        assert!(evaluate_cel_predicate(&program, &ctx).unwrap());
    }

    #[test]
    fn test_meta_access() {
        let program = compile_cel("meta.version == '3'").unwrap();
        assert!(program.reads_meta());
        assert!(!program.reads_tags());

        let tags = HashMap::new();
        let meta: HashMap<String, String> = [("version".into(), "3".into())].into();
        let ctx = make_ctx(&tags, &meta);

        assert!(evaluate_cel_predicate(&program, &ctx).unwrap());
    }

    #[test]
    fn test_non_boolean_is_rejected() {
        let program = compile_cel("tags.name").unwrap();

        let tags: HashMap<String, String> = [("name".into(), "Foo".into())].into();
        let meta = HashMap::new();
        let ctx = make_ctx(&tags, &meta);

        assert!(matches!(
            evaluate_cel_predicate(&program, &ctx),
            Err(FilterError::NotBoolean(_))
        ));
    }

    #[test]
    fn test_compile_error() {
        assert!(matches!(
            compile_cel("tags.name ==").unwrap_err(),
            FilterError::Compile { .. }
        ));
    }
}

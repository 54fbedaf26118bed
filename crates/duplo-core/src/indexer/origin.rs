//! Symbol origin tracking.
//!
//! Decides, for every extracted symbol, whether it is the original definition
//! or a reference to one defined elsewhere, records the defining location and
//! inheritance parent, and derives the canonical origin signature. Resolution
//! is best-effort: any resolver failure degrades to the local-definition
//! default and is logged, never propagated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, warn};

use crate::errors::ResolutionError;
use crate::indexer::symbols::to_module_name;
use crate::models::{Location, Symbol, SymbolKind};

/// Capability consumed from a symbol resolution service (an LSP server, a
/// compiler index, or the in-process [`NameTableResolver`]).
///
/// `Ok(None)` / an empty list is the expected "nothing found" answer;
/// `Err` means the service itself failed.
pub trait SymbolResolver: Send + Sync {
    fn resolve_definition(&self, symbol: &Symbol) -> Result<Option<Location>, ResolutionError>;

    fn resolve_references(&self, symbol: &Symbol) -> Result<Vec<Location>, ResolutionError>;

    fn resolve_parent_class(&self, symbol: &Symbol) -> Result<Option<String>, ResolutionError>;
}

// ---------------------------------------------------------------------------
// OriginTracker
// ---------------------------------------------------------------------------

pub struct OriginTracker<'a> {
    resolver: &'a dyn SymbolResolver,
}

impl<'a> OriginTracker<'a> {
    pub fn new(resolver: &'a dyn SymbolResolver) -> Self {
        Self { resolver }
    }

    /// Produce a new symbol carrying resolved origin fields. The input is left
    /// untouched; origin data is re-created on every pass.
    pub fn track(&self, symbol: &Symbol) -> Symbol {
        let mut tracked = symbol.clone();
        tracked.definition_file = None;
        tracked.definition_line = None;
        tracked.is_reference = false;
        tracked.is_definition = true;
        tracked.parent_class = None;
        tracked.reference_count = 0;

        let definition = self.resolver.resolve_definition(symbol).unwrap_or_else(|err| {
            warn!(
                symbol = %symbol.name,
                file = %symbol.file,
                error = %err,
                "definition lookup failed; assuming local definition"
            );
            None
        });

        let annotation = symbol.kind == SymbolKind::Type && symbol.in_annotation;
        let by_construction = symbol.is_import || symbol.kind == SymbolKind::Import || annotation;
        match definition {
            Some(location) if annotation || (by_construction && location.file != symbol.file) => {
                // Imports and annotation types are references by construction;
                // no references query.
                mark_reference(&mut tracked, location);
            }
            None if annotation => {
                // Names a type defined outside the project.
                tracked.is_reference = true;
                tracked.is_definition = false;
            }
            Some(location) => {
                let is_own = location.file == symbol.file && location.line == symbol.line;
                if is_own {
                    tracked.definition_file = Some(location.file);
                    tracked.definition_line = Some(location.line);
                } else {
                    mark_reference(&mut tracked, location);
                }
                tracked.reference_count = self.count_references(symbol);
            }
            None if by_construction => {}
            None => {
                tracked.reference_count = self.count_references(symbol);
            }
        }

        if symbol.kind == SymbolKind::Method {
            tracked.parent_class = self
                .resolver
                .resolve_parent_class(symbol)
                .unwrap_or_else(|err| {
                    warn!(symbol = %symbol.name, error = %err, "parent class lookup failed");
                    None
                })
                .filter(|p| !p.is_empty());
        }

        tracked.refresh_origin_signature();
        tracked
    }

    pub fn track_all(&self, symbols: &[Symbol]) -> Vec<Symbol> {
        let tracked: Vec<Symbol> = symbols.iter().map(|s| self.track(s)).collect();
        debug!(
            symbols = tracked.len(),
            references = tracked.iter().filter(|s| s.is_reference).count(),
            "origin tracking complete"
        );
        tracked
    }

    fn count_references(&self, symbol: &Symbol) -> u32 {
        match self.resolver.resolve_references(symbol) {
            Ok(refs) => refs
                .iter()
                .filter(|loc| !(loc.file == symbol.file && loc.line == symbol.line))
                .count() as u32,
            Err(err) => {
                warn!(symbol = %symbol.name, error = %err, "reference lookup failed");
                0
            }
        }
    }
}

fn mark_reference(symbol: &mut Symbol, location: Location) {
    symbol.definition_file = Some(location.file);
    symbol.definition_line = Some(location.line);
    symbol.is_reference = true;
    symbol.is_definition = false;
}

// ---------------------------------------------------------------------------
// TimeoutResolver
// ---------------------------------------------------------------------------

/// Bounds every call to an inner resolver with a timeout.
///
/// Each call runs on a short-lived worker thread; a call that overruns is
/// abandoned and reported as [`ResolutionError::Timeout`].
pub struct TimeoutResolver {
    inner: Arc<dyn SymbolResolver>,
    timeout: Duration,
}

type ResolverCall<T> = fn(&dyn SymbolResolver, &Symbol) -> Result<T, ResolutionError>;

impl TimeoutResolver {
    pub fn new(inner: Arc<dyn SymbolResolver>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    fn bounded<T: Send + 'static>(
        &self,
        symbol: &Symbol,
        call: ResolverCall<T>,
    ) -> Result<T, ResolutionError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let inner = Arc::clone(&self.inner);
        let owned = symbol.clone();
        std::thread::Builder::new()
            .name("duplo-resolve".to_string())
            .spawn(move || {
                let _ = tx.send(call(inner.as_ref(), &owned));
            })
            .map_err(|e| ResolutionError::Failed(e.to_string()))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ResolutionError::Timeout {
                after_ms: self.timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(ResolutionError::Failed(
                "resolver exited without answering".to_string(),
            )),
        }
    }
}

impl SymbolResolver for TimeoutResolver {
    fn resolve_definition(&self, symbol: &Symbol) -> Result<Option<Location>, ResolutionError> {
        self.bounded(symbol, |r, s| r.resolve_definition(s))
    }

    fn resolve_references(&self, symbol: &Symbol) -> Result<Vec<Location>, ResolutionError> {
        self.bounded(symbol, |r, s| r.resolve_references(s))
    }

    fn resolve_parent_class(&self, symbol: &Symbol) -> Result<Option<String>, ResolutionError> {
        self.bounded(symbol, |r, s| r.resolve_parent_class(s))
    }
}

// ---------------------------------------------------------------------------
// NameTableResolver
// ---------------------------------------------------------------------------

/// In-process resolver built from one whole-project extraction pass.
///
/// Definitions are looked up by name, imports are matched to the defining
/// module when the imported name is defined inside the project, annotation
/// types resolve through their own file first, and parent classes come from
/// declared bases.
#[derive(Default)]
pub struct NameTableResolver {
    definitions: HashMap<String, Vec<Location>>,
    modules: HashMap<Location, String>,
    class_bases: HashMap<String, Vec<String>>,
    /// `(class, method)` to every declaring location; same-named classes in
    /// different files each keep their own entry.
    class_methods: HashMap<(String, String), Vec<Location>>,
    /// Import and annotation use sites by name.
    uses: HashMap<String, Vec<Location>>,
    /// `(file, imported name)` to the import source.
    file_imports: HashMap<(String, String), Option<String>>,
}

fn normalize_module(source: &str) -> String {
    let trimmed = source
        .trim_start_matches("./")
        .trim_start_matches("../")
        .trim_start_matches("crate::")
        .trim_start_matches("super::");
    trimmed.replace("::", ".").replace('/', ".")
}

impl NameTableResolver {
    pub fn from_symbols(symbols: &[Symbol]) -> Self {
        let mut table = Self::default();
        for symbol in symbols {
            let location = symbol.location();
            if symbol.is_import || symbol.in_annotation {
                if symbol.is_import {
                    table.file_imports.insert(
                        (symbol.file.clone(), symbol.name.clone()),
                        symbol.import_source.clone(),
                    );
                }
                table.uses.entry(symbol.name.clone()).or_default().push(location);
                continue;
            }
            if symbol.kind == SymbolKind::Method {
                if let Some(scope) = &symbol.scope {
                    table
                        .class_methods
                        .entry((scope.clone(), symbol.name.clone()))
                        .or_default()
                        .push(location.clone());
                }
            } else {
                table
                    .modules
                    .insert(location.clone(), to_module_name(&symbol.file));
                table
                    .definitions
                    .entry(symbol.name.clone())
                    .or_default()
                    .push(location);
            }
            if matches!(symbol.kind, SymbolKind::Class | SymbolKind::Interface) {
                table
                    .class_bases
                    .entry(symbol.name.clone())
                    .or_default()
                    .extend(symbol.bases.iter().cloned());
            }
        }
        table
    }

    /// Definition of `name` as imported into `from_file` from `source`.
    fn resolve_imported(
        &self,
        name: &str,
        source: Option<&str>,
        from_file: &str,
    ) -> Option<Location> {
        let candidates = self.definitions.get(name)?;
        let source = source.map(normalize_module);
        if let Some(source) = source.filter(|s| !s.is_empty()) {
            let qualified = format!("{}.{}", source, name);
            let matched = candidates.iter().find(|loc| {
                self.modules.get(*loc).is_some_and(|module| {
                    module == &source
                        || module.ends_with(&format!(".{}", source))
                        || module == &qualified
                        || module.ends_with(&format!(".{}", qualified))
                })
            });
            if let Some(location) = matched {
                return Some(location.clone());
            }
        }
        // A name defined exactly once in the project is unambiguous.
        match candidates.as_slice() {
            [only] if only.file != from_file => Some(only.clone()),
            _ => None,
        }
    }

    /// A type named in an annotation: a definition in the same file wins,
    /// then whatever that file imports under the name.
    fn resolve_annotation(&self, symbol: &Symbol) -> Option<Location> {
        let candidates = self.definitions.get(&symbol.name)?;
        if let Some(local) = candidates.iter().find(|loc| loc.file == symbol.file) {
            return Some(local.clone());
        }
        let source = self
            .file_imports
            .get(&(symbol.file.clone(), symbol.name.clone()))
            .cloned()
            .flatten();
        self.resolve_imported(&symbol.name, source.as_deref(), &symbol.file)
    }
}

impl SymbolResolver for NameTableResolver {
    fn resolve_definition(&self, symbol: &Symbol) -> Result<Option<Location>, ResolutionError> {
        if symbol.is_import {
            return Ok(self.resolve_imported(
                &symbol.name,
                symbol.import_source.as_deref(),
                &symbol.file,
            ));
        }
        if symbol.in_annotation {
            return Ok(self.resolve_annotation(symbol));
        }
        // A declaration site is its own origin.
        let own = symbol.location();
        let known = if symbol.kind == SymbolKind::Method {
            let key = (symbol.scope.clone().unwrap_or_default(), symbol.name.clone());
            self.class_methods.get(&key).is_some_and(|locs| locs.contains(&own))
        } else {
            self.definitions
                .get(&symbol.name)
                .is_some_and(|locs| locs.contains(&own))
        };
        Ok(known.then_some(own))
    }

    fn resolve_references(&self, symbol: &Symbol) -> Result<Vec<Location>, ResolutionError> {
        Ok(self
            .uses
            .get(&symbol.name)
            .map(|locs| locs.iter().filter(|l| l.file != symbol.file).cloned().collect())
            .unwrap_or_default())
    }

    fn resolve_parent_class(&self, symbol: &Symbol) -> Result<Option<String>, ResolutionError> {
        let Some(scope) = symbol.scope.as_ref() else {
            return Ok(None);
        };
        let Some(bases) = self.class_bases.get(scope) else {
            return Ok(None);
        };
        // Prefer the nearest known base that defines the same method.
        let mut frontier: Vec<&String> = bases.iter().collect();
        let mut visited = 0usize;
        while let Some(base) = frontier.pop() {
            visited += 1;
            if visited > 64 {
                break;
            }
            if self
                .class_methods
                .contains_key(&(base.clone(), symbol.name.clone()))
            {
                return Ok(Some(base.clone()));
            }
            if let Some(grand) = self.class_bases.get(base) {
                frontier.extend(grand.iter());
            }
        }
        Ok(bases
            .iter()
            .find(|b| self.class_bases.contains_key(*b))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_symbol(name: &str, kind: SymbolKind, file: &str, line: i64) -> Symbol {
        Symbol::new(name, kind, file, line)
    }

    /// Resolver answering from a fixed table.
    struct FixedResolver {
        definition: Option<Location>,
        references: Vec<Location>,
        parent: Option<String>,
        reference_calls: AtomicUsize,
    }

    impl FixedResolver {
        fn new(definition: Option<Location>) -> Self {
            Self {
                definition,
                references: vec![],
                parent: None,
                reference_calls: AtomicUsize::new(0),
            }
        }
    }

    impl SymbolResolver for FixedResolver {
        fn resolve_definition(&self, _: &Symbol) -> Result<Option<Location>, ResolutionError> {
            Ok(self.definition.clone())
        }

        fn resolve_references(&self, _: &Symbol) -> Result<Vec<Location>, ResolutionError> {
            self.reference_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.references.clone())
        }

        fn resolve_parent_class(&self, _: &Symbol) -> Result<Option<String>, ResolutionError> {
            Ok(self.parent.clone())
        }
    }

    struct BrokenResolver;

    impl SymbolResolver for BrokenResolver {
        fn resolve_definition(&self, _: &Symbol) -> Result<Option<Location>, ResolutionError> {
            Err(ResolutionError::Failed("server crashed".to_string()))
        }

        fn resolve_references(&self, _: &Symbol) -> Result<Vec<Location>, ResolutionError> {
            Err(ResolutionError::Failed("server crashed".to_string()))
        }

        fn resolve_parent_class(&self, _: &Symbol) -> Result<Option<String>, ResolutionError> {
            Err(ResolutionError::Failed("server crashed".to_string()))
        }
    }

    struct SlowResolver;

    impl SymbolResolver for SlowResolver {
        fn resolve_definition(&self, _: &Symbol) -> Result<Option<Location>, ResolutionError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Some(Location::new("elsewhere.py", 1)))
        }

        fn resolve_references(&self, _: &Symbol) -> Result<Vec<Location>, ResolutionError> {
            Ok(vec![])
        }

        fn resolve_parent_class(&self, _: &Symbol) -> Result<Option<String>, ResolutionError> {
            Ok(None)
        }
    }

    #[test]
    fn test_own_location_is_definition() {
        let resolver = FixedResolver {
            references: vec![Location::new("b.py", 3), Location::new("c.py", 9)],
            ..FixedResolver::new(Some(Location::new("a.py", 10)))
        };
        let tracked = OriginTracker::new(&resolver)
            .track(&make_symbol("load", SymbolKind::Function, "a.py", 10));
        assert!(tracked.is_definition);
        assert!(!tracked.is_reference);
        assert_eq!(tracked.definition_file.as_deref(), Some("a.py"));
        assert_eq!(tracked.reference_count, 2);
        assert_eq!(tracked.origin_signature, "a.py::10::function");
    }

    #[test]
    fn test_other_location_is_reference() {
        let resolver = FixedResolver::new(Some(Location::new("a.py", 10)));
        let tracker = OriginTracker::new(&resolver);
        let same_file_other_line =
            tracker.track(&make_symbol("load", SymbolKind::Function, "a.py", 40));
        assert!(same_file_other_line.is_reference);
        assert!(!same_file_other_line.is_definition);

        let other_file = tracker.track(&make_symbol("load", SymbolKind::Function, "b.py", 10));
        assert!(other_file.is_reference);
        assert_eq!(other_file.origin_signature, same_file_other_line.origin_signature);
    }

    #[test]
    fn test_unresolved_defaults_to_local_definition() {
        let resolver = FixedResolver::new(None);
        let tracked =
            OriginTracker::new(&resolver).track(&make_symbol("x", SymbolKind::Variable, "a.py", 2));
        assert!(tracked.is_definition);
        assert!(!tracked.is_reference);
        assert_eq!(tracked.reference_count, 0);
        assert_eq!(tracked.definition_file, None);
    }

    #[test]
    fn test_import_is_reference_without_references_query() {
        let resolver = FixedResolver::new(Some(Location::new("lib/util.py", 4)));
        let mut import = make_symbol("helper", SymbolKind::Import, "app.py", 1);
        import.import_source = Some("lib.util".to_string());
        let tracked = OriginTracker::new(&resolver).track(&import);
        assert!(tracked.is_reference);
        assert_eq!(resolver.reference_calls.load(Ordering::SeqCst), 0);
        assert_eq!(tracked.origin_signature, "lib/util.py::4::import::import:lib.util");
    }

    #[test]
    fn test_annotation_type_is_reference_without_references_query() {
        let resolver = FixedResolver::new(Some(Location::new("models/session.py", 3)));
        let mut annotation = make_symbol("Session", SymbolKind::Type, "app.py", 7);
        annotation.in_annotation = true;
        let tracked = OriginTracker::new(&resolver).track(&annotation);
        assert!(tracked.is_reference);
        assert!(!tracked.is_definition);
        assert_eq!(tracked.definition_file.as_deref(), Some("models/session.py"));
        assert_eq!(resolver.reference_calls.load(Ordering::SeqCst), 0);

        let unresolved = OriginTracker::new(&FixedResolver::new(None)).track(&annotation);
        assert!(unresolved.is_reference);
        assert!(!unresolved.is_definition);

        let declared = make_symbol("Session", SymbolKind::Type, "app.py", 7);
        let tracked = OriginTracker::new(&resolver).track(&declared);
        assert!(tracked.is_reference);
        assert_eq!(resolver.reference_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parent_class_only_for_methods() {
        let resolver = FixedResolver {
            parent: Some("Base".to_string()),
            ..FixedResolver::new(None)
        };
        let tracker = OriginTracker::new(&resolver);
        let method = tracker.track(&make_symbol("save", SymbolKind::Method, "m.py", 5));
        assert_eq!(method.parent_class.as_deref(), Some("Base"));
        assert!(method.origin_signature.starts_with("Base::"));

        let function = tracker.track(&make_symbol("save", SymbolKind::Function, "m.py", 5));
        assert_eq!(function.parent_class, None);
    }

    #[test]
    fn test_resolver_failure_degrades() {
        let tracked = OriginTracker::new(&BrokenResolver)
            .track(&make_symbol("save", SymbolKind::Method, "m.py", 5));
        assert!(tracked.is_definition);
        assert_eq!(tracked.parent_class, None);
        assert_eq!(tracked.reference_count, 0);
    }

    #[test]
    fn test_timeout_resolver_reports_timeout() {
        let resolver = TimeoutResolver::new(Arc::new(SlowResolver), Duration::from_millis(20));
        let symbol = make_symbol("f", SymbolKind::Function, "a.py", 1);
        let err = resolver.resolve_definition(&symbol).unwrap_err();
        assert_eq!(err, ResolutionError::Timeout { after_ms: 20 });

        let tracked = OriginTracker::new(&resolver).track(&symbol);
        assert!(tracked.is_definition);
        assert_eq!(tracked.definition_file, None);
    }

    #[test]
    fn test_timeout_resolver_passes_through_fast_answers() {
        let resolver = TimeoutResolver::new(
            Arc::new(FixedResolver::new(Some(Location::new("a.py", 1)))),
            Duration::from_secs(5),
        );
        let symbol = make_symbol("f", SymbolKind::Function, "a.py", 1);
        assert_eq!(
            resolver.resolve_definition(&symbol).unwrap(),
            Some(Location::new("a.py", 1))
        );
    }

    #[test]
    fn test_name_table_resolves_imports_and_parents() {
        let mut base = make_symbol("Model", SymbolKind::Class, "models/base.py", 1);
        base.end_line = 10;
        let mut base_save = make_symbol("save", SymbolKind::Method, "models/base.py", 3);
        base_save.scope = Some("Model".to_string());
        let mut user = make_symbol("User", SymbolKind::Class, "models/user.py", 3);
        user.bases = vec!["Model".to_string()];
        let mut user_save = make_symbol("save", SymbolKind::Method, "models/user.py", 4);
        user_save.scope = Some("User".to_string());
        let mut import = make_symbol("Model", SymbolKind::Import, "models/user.py", 1);
        import.import_source = Some("models.base".to_string());

        let all = vec![base, base_save, user, user_save.clone(), import.clone()];
        let resolver = NameTableResolver::from_symbols(&all);
        let tracker = OriginTracker::new(&resolver);
        let tracked = tracker.track_all(&all);

        let tracked_import = tracked.iter().find(|s| s.is_import).unwrap();
        assert!(tracked_import.is_reference);
        assert_eq!(tracked_import.definition_file.as_deref(), Some("models/base.py"));

        let tracked_save = tracker.track(&user_save);
        assert!(tracked_save.is_definition);
        assert_eq!(tracked_save.parent_class.as_deref(), Some("Model"));

        let model_class = tracked.iter().find(|s| s.name == "Model" && !s.is_import).unwrap();
        assert!(model_class.is_definition);
        assert_eq!(model_class.reference_count, 1);
    }

    #[test]
    fn test_same_named_classes_keep_their_own_methods() {
        let mut all = Vec::new();
        for file in ["a/users.py", "b/users.py"] {
            let mut class = make_symbol("User", SymbolKind::Class, file, 1);
            class.end_line = 6;
            let mut save = make_symbol("save", SymbolKind::Method, file, 2);
            save.scope = Some("User".to_string());
            save.end_line = 6;
            all.push(class);
            all.push(save);
        }
        let resolver = NameTableResolver::from_symbols(&all);
        let tracked = OriginTracker::new(&resolver).track_all(&all);

        let saves: Vec<&Symbol> = tracked.iter().filter(|s| s.name == "save").collect();
        assert_eq!(saves.len(), 2);
        for save in &saves {
            assert!(save.is_definition);
            assert!(!save.is_reference);
            assert_eq!(save.definition_file.as_deref(), Some(save.file.as_str()));
        }
        assert_ne!(saves[0].origin_signature, saves[1].origin_signature);
    }

    #[test]
    fn test_name_table_annotation_prefers_local_definition() {
        let session = make_symbol("Session", SymbolKind::Class, "db/session.py", 1);
        let local = make_symbol("Session", SymbolKind::Class, "app/local.py", 1);
        let mut import = make_symbol("Session", SymbolKind::Import, "app/views.py", 1);
        import.is_import = true;
        import.import_source = Some("db.session".to_string());
        let mut imported_use = make_symbol("Session", SymbolKind::Type, "app/views.py", 4);
        imported_use.in_annotation = true;
        let mut local_use = make_symbol("Session", SymbolKind::Type, "app/local.py", 5);
        local_use.in_annotation = true;

        let all = vec![session, local, import, imported_use.clone(), local_use.clone()];
        let resolver = NameTableResolver::from_symbols(&all);
        assert_eq!(
            resolver.resolve_definition(&imported_use).unwrap(),
            Some(Location::new("db/session.py", 1))
        );
        assert_eq!(
            resolver.resolve_definition(&local_use).unwrap(),
            Some(Location::new("app/local.py", 1))
        );
        // Annotation sites count as uses of the definition they name.
        let definition = make_symbol("Session", SymbolKind::Class, "db/session.py", 1);
        assert_eq!(resolver.resolve_references(&definition).unwrap().len(), 3);
    }
}

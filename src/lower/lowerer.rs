//! Lowering targets into build-graph nodes
//!
//! Walks a target's command list, resolving every target reference against
//! the caller through `join`, recursing into dependencies, and emitting a
//! `BuildNode` with a content fingerprint. Lowering across targets is
//! parallel-safe: a per-canonical-reference single-flight barrier ensures at
//! most one lowering per reference proceeds at a time, and a cancellation
//! token threaded through the walk stops in-progress work when a sibling
//! fails. Completed nodes are retained even across cancellation.

use crate::domain::{GitLookup, Origin, RefError, Reference};
use crate::lower::expand::expand;
use crate::lower::loader::RecipeLoader;
use crate::lower::node::{BuildNode, CacheClass, Effect, Fingerprinter, Output};
use crate::lower::singleflight::SingleFlight;
use crate::syntax::{Command, Recipe};
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone)]
pub enum LowerError {
    #[error(transparent)]
    Ref(#[from] RefError),
    #[error("Target {target} not found in {project}")]
    MissingTarget { target: String, project: String },
    #[error("Required ARG {0} has no value")]
    MissingArg(String),
    #[error("Dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
    #[error("COPY --dir requires a directory source, {0} is a file")]
    NotADirectory(String),
    #[error("Failed to load recipe for {project}: {message}")]
    Load { project: String, message: String },
    #[error("Lowering cancelled")]
    Cancelled,
}

/// Caller-supplied inputs to one lowering invocation.
#[derive(Debug, Clone, Default)]
pub struct LowerOptions {
    /// Push mode: the driver will execute push effects.
    pub push: bool,
    /// Build-arg overrides from the command line.
    pub build_args: HashMap<String, String>,
    /// Fallback ARG values from the working directory's `.env` file.
    pub dotenv: HashMap<String, String>,
    /// Known image digests, keyed by image name. A base image with no
    /// entry is fingerprinted by name alone.
    pub image_digests: HashMap<String, String>,
}

/// Mutable state accumulated while walking one target's commands.
struct TargetState {
    effects: Vec<Effect>,
    push_effects: Vec<Effect>,
    outputs: Vec<Output>,
    deps: BTreeSet<String>,
    base_descriptor: String,
    local: bool,
    entrypoint: Option<Vec<String>>,
}

type LowerResult = Result<Arc<BuildNode>, LowerError>;

/// Invocation-scoped lowering context. All shared state (matcher registry,
/// recipe cache, single-flight map, node map) lives here and is torn down
/// with it.
pub struct Lowerer {
    lookup: Arc<GitLookup>,
    loader: Arc<dyn RecipeLoader>,
    opts: LowerOptions,
    recipes: RwLock<HashMap<String, Arc<Recipe>>>,
    nodes: DashMap<String, Arc<BuildNode>>,
    flight: SingleFlight<LowerResult>,
    cancel: CancellationToken,
}

impl Lowerer {
    pub fn new(lookup: Arc<GitLookup>, loader: Arc<dyn RecipeLoader>, opts: LowerOptions) -> Self {
        Self {
            lookup,
            loader,
            opts,
            recipes: RwLock::new(HashMap::new()),
            nodes: DashMap::new(),
            flight: SingleFlight::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// The token cancelling this invocation. Cancelling it stops
    /// not-yet-started work and best-effort-stops in-progress lowerings at
    /// their next suspension point.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// All nodes lowered so far, sorted by id for stable output.
    pub fn nodes(&self) -> Vec<Arc<BuildNode>> {
        let mut out: Vec<_> = self.nodes.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Lowers a single target and, transitively, everything it depends on.
    pub async fn lower(self: &Arc<Self>, reference: &Reference) -> LowerResult {
        self.lower_ref(reference.clone(), Vec::new(), Arc::new(HashMap::new()))
            .await
    }

    /// Lowers several root targets concurrently, bottom-up through their
    /// dep relation. The first failure cancels all in-progress siblings;
    /// completed nodes stay valid.
    pub async fn lower_all(
        self: &Arc<Self>,
        references: &[Reference],
    ) -> Result<Vec<Arc<BuildNode>>, LowerError> {
        let mut set = JoinSet::new();
        for reference in references {
            let me = Arc::clone(self);
            let reference = reference.clone();
            set.spawn(async move {
                me.lower_ref(reference, Vec::new(), Arc::new(HashMap::new()))
                    .await
            });
        }

        let mut roots = Vec::new();
        let mut first_err: Option<LowerError> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(node)) => roots.push(node),
                Ok(Err(err)) => {
                    if first_err.is_none() {
                        warn!(error = %err, "lowering failed, cancelling siblings");
                        self.cancel.cancel();
                        first_err = Some(err);
                    }
                }
                Err(_) => {
                    if first_err.is_none() {
                        self.cancel.cancel();
                        first_err = Some(LowerError::Cancelled);
                    }
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => {
                roots.sort_by(|a, b| a.id.cmp(&b.id));
                Ok(roots)
            }
        }
    }

    /// Recursive entry point. `path` is the DFS chain of canonical
    /// references currently being lowered (the gray set); completed nodes
    /// in the node map are the black set.
    fn lower_ref(
        self: &Arc<Self>,
        reference: Reference,
        path: Vec<String>,
        overrides: Arc<HashMap<String, String>>,
    ) -> Pin<Box<dyn Future<Output = LowerResult> + Send>> {
        let me = Arc::clone(self);
        Box::pin(async move {
            if me.cancel.is_cancelled() {
                return Err(LowerError::Cancelled);
            }
            let canonical = reference.canonical();

            if let Some(start) = path.iter().position(|p| p == &canonical) {
                let mut cycle: Vec<String> = path[start..].to_vec();
                cycle.push(canonical);
                return Err(LowerError::Cycle { path: cycle });
            }

            // BUILD-scoped arg values produce a distinct cache entry; the
            // node id stays the canonical reference either way.
            let flight_key = if overrides.is_empty() {
                canonical.clone()
            } else {
                let mut kv: Vec<String> = overrides
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect();
                kv.sort();
                format!("{}\u{1f}{}", canonical, kv.join("\u{1f}"))
            };

            if let Some(node) = me.nodes.get(&flight_key) {
                return Ok(node.value().clone());
            }

            let inner = Arc::clone(&me);
            let key = flight_key.clone();
            me.flight
                .run(&flight_key, move || async move {
                    inner.do_lower(reference, canonical, key, path, overrides).await
                })
                .await
        })
    }

    async fn do_lower(
        self: Arc<Self>,
        reference: Reference,
        canonical: String,
        flight_key: String,
        mut path: Vec<String>,
        overrides: Arc<HashMap<String, String>>,
    ) -> LowerResult {
        if let Some(node) = self.nodes.get(&flight_key) {
            return Ok(node.value().clone());
        }
        debug!(reference = %canonical, "lowering target");
        path.push(canonical.clone());

        let recipe = self.recipe_for(&reference).await?;
        let def = recipe
            .target(reference.target())
            .ok_or_else(|| LowerError::MissingTarget {
                target: reference.target().to_string(),
                project: reference.project_canonical(),
            })?;

        let mut env: HashMap<String, String> = HashMap::new();
        if let Ok(term) = std::env::var("TERM") {
            env.insert("TERM".to_string(), term);
        }
        let mut state = TargetState {
            effects: Vec::new(),
            push_effects: Vec::new(),
            outputs: Vec::new(),
            deps: BTreeSet::new(),
            base_descriptor: String::new(),
            local: false,
            entrypoint: None,
        };

        // File-level preamble: ARG declarations visible to every target.
        for cmd in &recipe.base_block {
            if cmd.opcode == "ARG" {
                self.declare_arg(cmd, &mut env, &overrides)?;
            }
        }
        for cmd in &def.commands {
            self.lower_command(cmd, &reference, &mut state, &mut env, &path, &overrides)
                .await?;
        }

        let mut fp = Fingerprinter::new(&canonical);
        fp.base(&state.base_descriptor);
        for effect in &state.effects {
            fp.effect(effect);
        }

        let node = Arc::new(BuildNode {
            id: canonical.clone(),
            fingerprint_hex: fp.finish(),
            deps: state.deps.into_iter().collect(),
            effects: state.effects,
            push_effects: state.push_effects,
            outputs: state.outputs,
        });
        self.nodes.insert(flight_key, node.clone());
        info!(reference = %canonical, fingerprint = %node.fingerprint_hex, "lowered");
        Ok(node)
    }

    async fn lower_command(
        self: &Arc<Self>,
        cmd: &Command,
        caller: &Reference,
        state: &mut TargetState,
        env: &mut HashMap<String, String>,
        path: &[String],
        overrides: &Arc<HashMap<String, String>>,
    ) -> Result<(), LowerError> {
        let args: Vec<String> = cmd.args.iter().map(|a| expand(a, env)).collect();
        let class = if state.local {
            CacheClass::Local
        } else {
            cache_class(&cmd.opcode)
        };
        let push = cmd.has_flag("push");

        let mut effect_args = rendered_flags(cmd, env);
        match cmd.opcode.as_str() {
            "ARG" => {
                let (name, value) = self.declare_arg(cmd, env, overrides)?;
                effect_args.extend([name, value]);
            }
            "FROM" => {
                let base = args.first().cloned().unwrap_or_default();
                if base.contains('+') {
                    let dep = self.lower_dep(&base, caller, state, path).await?;
                    state.base_descriptor = dep.fingerprint_hex.clone();
                    effect_args.push(dep.id.clone());
                } else {
                    let descriptor = match self.opts.image_digests.get(&base) {
                        Some(digest) => format!("{}@{}", base, digest),
                        None => base,
                    };
                    state.base_descriptor = descriptor.clone();
                    effect_args.push(descriptor);
                }
            }
            "FROM DOCKERFILE" => {
                let context = args.first().cloned().unwrap_or_default();
                if context.contains('+') {
                    // A trailing slash denotes a directory artifact used as
                    // the on-disk build context.
                    let dep = self.lower_dep(&context, caller, state, path).await?;
                    let suffix = if context.ends_with('/') { "/" } else { "" };
                    effect_args.push(format!("{}{}", dep.id, suffix));
                } else {
                    effect_args.push(context);
                }
            }
            "COPY" => {
                let (sources, dest) = match args.split_last() {
                    Some((dest, sources)) => (sources, dest.clone()),
                    None => (&args[..], String::new()),
                };
                for source in sources {
                    if source.contains('+') {
                        let is_file_artifact = source
                            .split_once('+')
                            .map_or(false, |(_, name)| name.contains('/'))
                            && !source.ends_with('/');
                        if cmd.has_flag("dir") && is_file_artifact {
                            return Err(LowerError::NotADirectory(source.clone()));
                        }
                        let dep = self.lower_dep(source, caller, state, path).await?;
                        let artifact = source.split_once('+').map(|(_, n)| n).unwrap_or("");
                        match artifact.split_once('/') {
                            Some((_, sub)) => effect_args.push(format!("{}/{}", dep.id, sub)),
                            None => effect_args.push(dep.id.clone()),
                        }
                    } else {
                        effect_args.push(source.clone());
                    }
                }
                effect_args.push(dest);
            }
            "BUILD" => {
                let target = args.first().cloned().unwrap_or_default();
                let mut scoped: HashMap<String, String> = HashMap::new();
                for pair in cmd.flag_values("build-arg") {
                    let expanded = expand(pair, env);
                    match expanded.split_once('=') {
                        Some((k, v)) => {
                            scoped.insert(k.to_string(), v.to_string());
                        }
                        None => {
                            // Bare name: take the value from the current
                            // scope, falling back to the process env.
                            let value = env
                                .get(&expanded)
                                .cloned()
                                .or_else(|| std::env::var(&expanded).ok())
                                .unwrap_or_default();
                            scoped.insert(expanded, value);
                        }
                    }
                }
                let joined = caller.join(&Reference::parse(&target, &self.lookup)?)?;
                let dep = self
                    .lower_ref(joined, path.to_vec(), Arc::new(scoped))
                    .await?;
                state.deps.insert(dep.id.clone());
                effect_args.push(dep.id.clone());
            }
            "SAVE ARTIFACT" => {
                let source = args.first().cloned().unwrap_or_default();
                let declared = args
                    .get(1)
                    .cloned()
                    .unwrap_or_else(|| crate::domain::paths::base(&source));
                state.outputs.push(Output::Artifact {
                    path: declared.clone(),
                });
                effect_args.extend([source, declared]);
            }
            "SAVE IMAGE" => {
                for tag in &args {
                    state.outputs.push(Output::Image { tag: tag.clone() });
                }
                effect_args.extend(args.iter().cloned());
            }
            "LOCALLY" => {
                state.local = true;
            }
            "GIT CLONE" => {
                let mut clone_args = args.clone();
                if let Some(url) = clone_args.first_mut() {
                    if let Some((git_url, _)) = self.lookup.lookup(url) {
                        if let Ok(clone) = self.lookup.clone_url(&git_url) {
                            *url = clone;
                        }
                    }
                }
                effect_args.extend(clone_args);
            }
            "ENTRYPOINT" => {
                state.entrypoint = Some(args.clone());
                effect_args.extend(args.iter().cloned());
            }
            "ENV" => {
                if let Some(pair) = args.first() {
                    if let Some((k, v)) = pair.split_once('=') {
                        env.insert(k.to_string(), v.to_string());
                    }
                }
                effect_args.extend(args.iter().cloned());
            }
            "RUN" => {
                // --entrypoint runs the recorded ENTRYPOINT with these args
                // for this one invocation; the recorded value is left
                // untouched for later effects.
                if cmd.has_flag("entrypoint") {
                    if let Some(entrypoint) = &state.entrypoint {
                        effect_args.extend(entrypoint.iter().cloned());
                    }
                }
                effect_args.extend(args.iter().cloned());
                if let Some(body) = &cmd.heredoc {
                    effect_args.push(body.clone());
                }
            }
            _ => {
                effect_args.extend(args.iter().cloned());
                if let Some(body) = &cmd.heredoc {
                    effect_args.push(body.clone());
                }
            }
        }

        let mut effect = Effect {
            opcode: cmd.opcode.clone(),
            args: effect_args,
            cache_class: if cmd.opcode == "LOCALLY" {
                CacheClass::Local
            } else {
                class
            },
        };
        if push {
            if !state.local {
                effect.cache_class = CacheClass::Network;
            }
            state.push_effects.push(effect);
        } else {
            state.effects.push(effect);
        }
        Ok(())
    }

    /// Resolves an artifact or target reference appearing in a command,
    /// lowers the producing target, and records the dependency edge.
    async fn lower_dep(
        self: &Arc<Self>,
        text: &str,
        caller: &Reference,
        state: &mut TargetState,
        path: &[String],
    ) -> LowerResult {
        let parsed = Reference::parse(text.trim_end_matches('/'), &self.lookup)?;
        let joined = caller.join(&parsed)?;
        let target_ref = joined.with_name(joined.target());
        let node = self
            .lower_ref(target_ref, path.to_vec(), Arc::new(HashMap::new()))
            .await?;
        state.deps.insert(node.id.clone());
        Ok(node)
    }

    /// Declares an ARG: resolution order is BUILD-scoped overrides, then
    /// CLI build args, then `.env`, then the declared default.
    fn declare_arg(
        &self,
        cmd: &Command,
        env: &mut HashMap<String, String>,
        overrides: &Arc<HashMap<String, String>>,
    ) -> Result<(String, String), LowerError> {
        let declaration = cmd.args.first().cloned().unwrap_or_default();
        let (name, default) = match declaration.split_once('=') {
            Some((name, default)) => (name.to_string(), Some(default.to_string())),
            None => (declaration, None),
        };
        let value = overrides
            .get(&name)
            .or_else(|| self.opts.build_args.get(&name))
            .or_else(|| self.opts.dotenv.get(&name))
            .cloned()
            .or_else(|| default.map(|d| expand(&d, env)))
            .ok_or_else(|| LowerError::MissingArg(name.clone()))?;
        env.insert(name.clone(), value.clone());
        Ok((name, value))
    }

    async fn recipe_for(&self, reference: &Reference) -> Result<Arc<Recipe>, LowerError> {
        let key = recipe_cache_key(reference);
        {
            let cache = self.recipes.read().await;
            if let Some(recipe) = cache.get(&key) {
                return Ok(recipe.clone());
            }
        }
        let loaded = tokio::select! {
            _ = self.cancel.cancelled() => return Err(LowerError::Cancelled),
            loaded = self.loader.load(reference) => loaded,
        };
        let recipe = Arc::new(loaded.map_err(|e| LowerError::Load {
            project: reference.project_canonical(),
            message: format!("{:#}", e),
        })?);
        let mut cache = self.recipes.write().await;
        Ok(cache.entry(key).or_insert(recipe).clone())
    }
}

/// Cache key for loaded recipes. Remote projects use the project-canonical
/// form; local projects use the full path, which the canonical form (last
/// path segment only) would fold together.
fn recipe_cache_key(reference: &Reference) -> String {
    match reference.origin() {
        Origin::LocalInternal => ".".to_string(),
        Origin::LocalExternal { local_path } => local_path.clone(),
        Origin::Remote { .. } => reference.project_canonical(),
    }
}

/// Flags rendered into the effect's argument vector, so flag changes are
/// fingerprint-material like any other argument change.
fn rendered_flags(cmd: &Command, env: &HashMap<String, String>) -> Vec<String> {
    let mut out = Vec::new();
    for (name, _) in &cmd.flags {
        let values = cmd.flag_values(name);
        if values.is_empty() {
            out.push(format!("--{}", name));
        } else {
            for value in values {
                out.push(format!("--{}={}", name, expand(value, env)));
            }
        }
    }
    out
}

fn cache_class(opcode: &str) -> CacheClass {
    match opcode {
        "FROM" | "FROM DOCKERFILE" | "ARG" | "WORKDIR" | "ENTRYPOINT" | "CMD" | "ENV"
        | "EXPOSE" | "VOLUME" | "LABEL" | "BUILD" => CacheClass::Pure,
        "GIT CLONE" => CacheClass::Network,
        _ => CacheClass::FilesystemWrite,
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use runtime::Settings;

use crate::contracts::{CliModule, Module, RestfulModule};
use crate::error::RegistryError;

/// Builds a module from the loaded settings. Invoked once per run, in
/// registration order.
pub type ModuleFactory = Box<dyn Fn(&Settings) -> ModuleEntry + Send + Sync + 'static>;

/// A constructed module together with the capabilities it declared.
pub struct ModuleEntry {
    pub name: String,
    pub core: Arc<dyn Module>,
    pub rest: Option<Arc<dyn RestfulModule>>,
    pub cli: Option<Arc<dyn CliModule>>,
}

impl std::fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("name", &self.name)
            .field("has_rest", &self.rest.is_some())
            .field("has_cli", &self.cli.is_some())
            .finish()
    }
}

impl ModuleEntry {
    /// Entry with only the core capability.
    pub fn new<M: Module>(name: impl Into<String>, module: Arc<M>) -> Self {
        Self::builder(name, module).build()
    }

    /// Start declaring capabilities: `ModuleEntry::builder("hello", m).rest().cli().build()`.
    pub fn builder<M: Module>(name: impl Into<String>, module: Arc<M>) -> ModuleEntryBuilder<M> {
        ModuleEntryBuilder {
            name: name.into(),
            module,
            rest: None,
            cli: None,
        }
    }
}

pub struct ModuleEntryBuilder<M: Module> {
    name: String,
    module: Arc<M>,
    rest: Option<Arc<dyn RestfulModule>>,
    cli: Option<Arc<dyn CliModule>>,
}

impl<M: Module> ModuleEntryBuilder<M> {
    pub fn rest(mut self) -> Self
    where
        M: RestfulModule,
    {
        self.rest = Some(self.module.clone() as Arc<dyn RestfulModule>);
        self
    }

    pub fn cli(mut self) -> Self
    where
        M: CliModule,
    {
        self.cli = Some(self.module.clone() as Arc<dyn CliModule>);
        self
    }

    pub fn build(self) -> ModuleEntry {
        ModuleEntry {
            name: self.name,
            core: self.module,
            rest: self.rest,
            cli: self.cli,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    factories: Vec<ModuleFactory>,
    sealed: bool,
}

/// Ordered list of module factories. Sealed once the app starts running.
#[derive(Default)]
pub struct ModuleRegistry {
    state: Mutex<RegistryState>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ModuleRegistry")
            .field("factories", &state.factories.len())
            .field("sealed", &state.sealed)
            .finish()
    }
}

impl ModuleRegistry {
    pub fn register(&self, factory: ModuleFactory) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        if state.sealed {
            return Err(RegistryError::RegistrationClosed);
        }
        state.factories.push(factory);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.lock().factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close registration and hand out the factories, in registration order.
    pub(crate) fn seal(&self) -> Vec<ModuleFactory> {
        let mut state = self.state.lock();
        state.sealed = true;
        std::mem::take(&mut state.factories)
    }
}

/// Constructed modules, unique by name, in registration order.
#[derive(Default)]
pub(crate) struct ModuleSet {
    entries: Vec<ModuleEntry>,
}

impl ModuleSet {
    pub(crate) fn push(&mut self, entry: ModuleEntry) -> Result<(), (RegistryError, ModuleEntry)> {
        if self.entries.iter().any(|e| e.name == entry.name) {
            return Err((RegistryError::DuplicateModule(entry.name.clone()), entry));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub(crate) fn entries(&self) -> &[ModuleEntry] {
        &self.entries
    }
}

/// Let every CLI-capable module attach its sub-commands to `root`.
///
/// Returns the finished tree and a map from sub-command name to the index of
/// the owning entry. Names in `reserved` belong to the app itself.
pub(crate) fn build_command_tree(
    mut root: clap::Command,
    entries: &[ModuleEntry],
    reserved: &[&str],
) -> Result<(clap::Command, HashMap<String, usize>), RegistryError> {
    let mut owners: HashMap<String, usize> = HashMap::new();

    for (idx, entry) in entries.iter().enumerate() {
        let Some(cli) = &entry.cli else {
            continue;
        };
        let before = root.get_subcommands().count();
        root = cli.register_commands(root);

        let added: Vec<String> = root
            .get_subcommands()
            .skip(before)
            .map(|c| c.get_name().to_string())
            .collect();
        for name in added {
            if reserved.contains(&name.as_str()) {
                return Err(RegistryError::DuplicateCommand {
                    command: name,
                    first: "app".to_string(),
                    second: entry.name.clone(),
                });
            }
            if let Some(&first) = owners.get(&name) {
                return Err(RegistryError::DuplicateCommand {
                    command: name,
                    first: entries[first].name.clone(),
                    second: entry.name.clone(),
                });
            }
            owners.insert(name, idx);
        }
    }

    Ok((root, owners))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ModuleCtx;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Module for Noop {
        async fn init(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Greeter(&'static str);

    #[async_trait]
    impl Module for Greeter {
        async fn init(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl CliModule for Greeter {
        fn register_commands(&self, root: clap::Command) -> clap::Command {
            root.subcommand(clap::Command::new(self.0))
        }

        async fn execute(
            &self,
            _ctx: &ModuleCtx,
            _command: &str,
            _matches: &clap::ArgMatches,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn registration_closes_after_seal() {
        let reg = ModuleRegistry::default();
        reg.register(Box::new(|_| ModuleEntry::new("a", Arc::new(Noop))))
            .unwrap();
        assert_eq!(reg.len(), 1);

        let factories = reg.seal();
        assert_eq!(factories.len(), 1);
        assert!(matches!(
            reg.register(Box::new(|_| ModuleEntry::new("b", Arc::new(Noop)))),
            Err(RegistryError::RegistrationClosed)
        ));
    }

    #[test]
    fn module_set_rejects_duplicate_names() {
        let mut set = ModuleSet::default();
        set.push(ModuleEntry::new("a", Arc::new(Noop))).unwrap();
        let (err, rejected) = set.push(ModuleEntry::new("a", Arc::new(Noop))).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateModule(ref n) if n == "a"));
        assert_eq!(rejected.name, "a");
        assert_eq!(set.entries().len(), 1);
    }

    #[test]
    fn builder_declares_capabilities() {
        let entry = ModuleEntry::builder("greeter", Arc::new(Greeter("greet")))
            .cli()
            .build();
        assert!(entry.cli.is_some());
        assert!(entry.rest.is_none());
    }

    #[test]
    fn command_tree_maps_commands_to_owners() {
        let entries = vec![
            ModuleEntry::new("plain", Arc::new(Noop)),
            ModuleEntry::builder("a", Arc::new(Greeter("alpha"))).cli().build(),
            ModuleEntry::builder("b", Arc::new(Greeter("beta"))).cli().build(),
        ];
        let root = clap::Command::new("app").subcommand(clap::Command::new("start"));
        let (tree, owners) = build_command_tree(root, &entries, &["start"]).unwrap();
        assert_eq!(tree.get_subcommands().count(), 3);
        assert_eq!(owners.get("alpha"), Some(&1));
        assert_eq!(owners.get("beta"), Some(&2));
    }

    #[test]
    fn command_tree_rejects_clashing_names() {
        let entries = vec![
            ModuleEntry::builder("a", Arc::new(Greeter("dup"))).cli().build(),
            ModuleEntry::builder("b", Arc::new(Greeter("dup"))).cli().build(),
        ];
        let err = build_command_tree(clap::Command::new("app"), &entries, &[]).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateCommand { .. }));

        let reserved = vec![ModuleEntry::builder("c", Arc::new(Greeter("start"))).cli().build()];
        assert!(build_command_tree(clap::Command::new("app"), &reserved, &["start"]).is_err());
    }
}

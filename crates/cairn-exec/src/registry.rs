use std::collections::{BTreeMap, BTreeSet};

use cairn_types::CommandEnvelope;
use serde::de::DeserializeOwned;

use crate::command::Command;
use crate::commands::{WriteContentCommand, BUILTIN_MODULE};
use crate::error::{ExecError, ExecResult};

type Factory = Box<dyn Fn(&[u8]) -> ExecResult<Box<dyn Command>> + Send + Sync>;

struct Registration {
    module: String,
    factory: Factory,
}

/// Maps command kinds to constructors.
///
/// Each kind belongs to a module. The module names loaded on the build side
/// are sent to workers, which refuse to run when one of them is missing.
#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, Registration>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in commands.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register::<WriteContentCommand>(BUILTIN_MODULE, WriteContentCommand::KIND);
        registry
    }

    /// Register a command type whose payload is its JSON form.
    pub fn register<C>(&mut self, module: &str, kind: &str)
    where
        C: Command + DeserializeOwned + 'static,
    {
        let factory: Factory = Box::new(|payload: &[u8]| {
            let command: C = serde_json::from_slice(payload)
                .map_err(|e| ExecError::Serialization(e.to_string()))?;
            Ok(Box::new(command) as Box<dyn Command>)
        });
        self.commands.insert(
            kind.to_string(),
            Registration {
                module: module.to_string(),
                factory,
            },
        );
    }

    /// Rebuild a command from its envelope.
    pub fn create(&self, envelope: &CommandEnvelope) -> ExecResult<Box<dyn Command>> {
        let registration = self
            .commands
            .get(&envelope.kind)
            .ok_or_else(|| ExecError::UnknownCommandKind(envelope.kind.clone()))?;
        let command = (registration.factory)(&envelope.payload)?;
        if command.version() != envelope.version {
            return Err(ExecError::Serialization(format!(
                "command '{}' has version {}, envelope carries {}",
                envelope.kind,
                command.version(),
                envelope.version
            )));
        }
        Ok(command)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.commands.contains_key(kind)
    }

    /// Names of the modules with at least one registered command, sorted.
    pub fn modules(&self) -> Vec<String> {
        self.commands
            .values()
            .map(|r| r.module.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Fail if any of `modules` has nothing registered here.
    pub fn ensure_loaded(&self, modules: &[String]) -> ExecResult<()> {
        let loaded = self.modules();
        match modules.iter().find(|m| !loaded.contains(m)) {
            Some(missing) => Err(ExecError::MissingExtension(missing.clone())),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("kinds", &self.commands.keys().collect::<Vec<_>>())
            .finish()
    }
}

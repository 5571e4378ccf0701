mod capability;
mod date_search;
mod standalone_launch;

pub use self::capability::capability_statement;
pub use self::date_search::observation_date_search;
pub use self::standalone_launch::{standalone_launch, REDIRECT_ENDPOINT};

use crate::app::sequence::{DefinitionError, Registry};

/// Built-in sequences in the order they are meant to run.
pub fn registry() -> Result<Registry, DefinitionError> {
    let mut registry = Registry::new();
    registry.register(capability_statement()?)?;
    registry.register(standalone_launch()?)?;
    registry.register(observation_date_search()?)?;
    Ok(registry)
}

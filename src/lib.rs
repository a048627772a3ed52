pub mod config;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

pub use config::{AppConfig, FeatureToggles};

pub use logic::{
    BrokerError, BrokerRegistry, ContextBuilder, Counter, Evaluator, OperationTracker, RegistryError,
    SchemaValidator, ServiceBroker, ServiceDefinition, ServiceProvider, VarContext,
};

// Export all model types
pub use model::*;

pub use store::{MemoryStore, Store};

mod env_vars;
mod gandalf_config;

pub use env_vars::expand_env_vars;

pub use gandalf_config::{
    GandalfConfig,
    RemoteConfig,
    load_or_default,
};

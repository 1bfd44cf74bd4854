pub mod core;

pub use self::core::{
    CoreError, ObserverDispatchError, ObserverError, ObserverFailure, ValidationError,
};

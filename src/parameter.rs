//! Call-site parameters handed to constructors at resolution time

use std::any::Any;
use std::sync::Arc;

use crate::error::{DiError, DiResult};

/// Ordered, heterogeneous bag of values a caller passes to `get_with`,
/// consumed by the constructor that ends up running.
///
/// Values are cloned out on access. A cached definition that is resolved
/// again accepts parameters but ignores them; only the constructing call
/// sees the bag.
#[derive(Clone, Default)]
pub struct Parameters {
    values: Vec<Arc<dyn Any + Send + Sync>>,
}

impl Parameters {
    /// Empty parameter bag.
    pub fn none() -> Self {
        Self::default()
    }

    /// Append a value. The [`parameters!`](crate::parameters) macro is the
    /// usual way to build a bag.
    pub fn push<T: Send + Sync + 'static>(&mut self, value: T) {
        self.values.push(Arc::new(value));
    }

    /// Value at `index`, cloned out.
    pub fn get<T: Clone + 'static>(&self, index: usize) -> DiResult<T> {
        self.opt_get(index).ok_or_else(|| DiError::ParameterNotFound {
            request: format!("type '{}' at index {}", std::any::type_name::<T>(), index),
        })
    }

    /// First value of type `T`, cloned out.
    pub fn find<T: Clone + 'static>(&self) -> DiResult<T> {
        self.opt_find().ok_or_else(|| DiError::ParameterNotFound {
            request: format!("type '{}'", std::any::type_name::<T>()),
        })
    }

    /// Non-failing form of [`get`](Self::get).
    pub fn opt_get<T: Clone + 'static>(&self, index: usize) -> Option<T> {
        self.values
            .get(index)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Non-failing form of [`find`](Self::find).
    pub fn opt_find<T: Clone + 'static>(&self) -> Option<T> {
        self.values
            .iter()
            .find_map(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Number of values in the bag.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the bag is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Build a [`Parameters`] bag from a list of values.
///
/// ```
/// use armature::parameters;
///
/// let params = parameters![42, "addr".to_string()];
/// assert_eq!(params.len(), 2);
/// ```
#[macro_export]
macro_rules! parameters {
    () => {
        $crate::Parameters::none()
    };
    ($($value:expr),+ $(,)?) => {{
        let mut params = $crate::Parameters::none();
        $(params.push($value);)+
        params
    }};
}

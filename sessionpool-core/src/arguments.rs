//! Types and traits for passing arguments to SQL statements.

use std::ops::Index;
use std::slice;

use crate::value::Value;

/// A list of positional arguments that will be bound to a statement, `$1` first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: Vec<Value>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves capacity for at least `additional` more values.
    pub fn reserve(&mut self, additional: usize) {
        self.values.reserve(additional);
    }

    /// Add the value to the end of the arguments.
    pub fn add<T>(&mut self, value: T)
    where
        T: Into<Value>,
    {
        self.values.push(value.into());
    }

    /// The number of arguments that were already added.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up the argument bound to the 1-based placeholder `$n`.
    pub fn placeholder(&self, n: usize) -> Option<&Value> {
        n.checked_sub(1).and_then(|i| self.values.get(i))
    }

    pub fn iter(&self) -> slice::Iter<'_, Value> {
        self.values.iter()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl Index<usize> for Arguments {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl<'a> IntoIterator for &'a Arguments {
    type Item = &'a Value;
    type IntoIter = slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl From<Vec<Value>> for Arguments {
    fn from(values: Vec<Value>) -> Self {
        Self { values }
    }
}

/// Anything that can be turned into a list of positional [`Arguments`].
///
/// Implemented for `()`, [`Arguments`], `Vec<Value>` and tuples of up to eight
/// values that convert into [`Value`].
pub trait IntoArguments: Send {
    fn into_arguments(self) -> Arguments;
}

impl IntoArguments for Arguments {
    #[inline]
    fn into_arguments(self) -> Arguments {
        self
    }
}

impl IntoArguments for Vec<Value> {
    #[inline]
    fn into_arguments(self) -> Arguments {
        Arguments::from(self)
    }
}

impl IntoArguments for () {
    #[inline]
    fn into_arguments(self) -> Arguments {
        Arguments::new()
    }
}

macro_rules! impl_into_arguments_for_tuple {
    ($( ($idx:tt) -> $T:ident );+;) => {
        impl<$($T,)+> IntoArguments for ($($T,)+)
        where
            $($T: Into<Value> + Send,)+
        {
            fn into_arguments(self) -> Arguments {
                let mut arguments = Arguments::new();
                arguments.reserve([$($idx,)+].len());
                $(arguments.add(self.$idx);)+
                arguments
            }
        }
    };
}

impl_into_arguments_for_tuple!(
    (0) -> T1;
);

impl_into_arguments_for_tuple!(
    (0) -> T1;
    (1) -> T2;
);

impl_into_arguments_for_tuple!(
    (0) -> T1;
    (1) -> T2;
    (2) -> T3;
);

impl_into_arguments_for_tuple!(
    (0) -> T1;
    (1) -> T2;
    (2) -> T3;
    (3) -> T4;
);

impl_into_arguments_for_tuple!(
    (0) -> T1;
    (1) -> T2;
    (2) -> T3;
    (3) -> T4;
    (4) -> T5;
);

impl_into_arguments_for_tuple!(
    (0) -> T1;
    (1) -> T2;
    (2) -> T3;
    (3) -> T4;
    (4) -> T5;
    (5) -> T6;
);

impl_into_arguments_for_tuple!(
    (0) -> T1;
    (1) -> T2;
    (2) -> T3;
    (3) -> T4;
    (4) -> T5;
    (5) -> T6;
    (6) -> T7;
);

impl_into_arguments_for_tuple!(
    (0) -> T1;
    (1) -> T2;
    (2) -> T3;
    (3) -> T4;
    (4) -> T5;
    (5) -> T6;
    (6) -> T7;
    (7) -> T8;
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_binds_tuples_in_order() {
        let arguments = (1_i32, "two", None::<bool>).into_arguments();

        assert_eq!(arguments.len(), 3);
        assert_eq!(arguments.placeholder(1), Some(&Value::Int(1)));
        assert_eq!(arguments.placeholder(2), Some(&Value::Text("two".into())));
        assert_eq!(arguments.placeholder(3), Some(&Value::Null));
        assert_eq!(arguments.placeholder(0), None);
        assert_eq!(arguments.placeholder(4), None);
    }
}

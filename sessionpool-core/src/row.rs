use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use crate::decode::Decode;
use crate::error::Error;
use crate::value::Value;

/// The column names of a result set, shared by every [`Row`] in it.
#[derive(Debug, Default, PartialEq)]
pub struct Columns {
    names: Vec<String>,
    by_name: HashMap<String, usize>,
}

impl Columns {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();

        // the first column wins when a name repeats, as with `SELECT a, a`
        let mut by_name = HashMap::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            by_name.entry(name.clone()).or_insert(index);
        }

        Self { names, by_name }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.names.iter().map(String::as_str)
    }
}

/// A single row of a result set.
///
/// Values can be looked up by position or by column name with [`try_get`][Row::try_get].
#[derive(Clone, PartialEq)]
pub struct Row {
    columns: Arc<Columns>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a row. Drivers are expected to pass exactly one value per column.
    pub fn new(columns: Arc<Columns>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());

        Self { columns, values }
    }

    /// Returns `true` if this row has no columns.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of columns in this row.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn columns(&self) -> &Columns {
        &self.columns
    }

    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.columns.name(index)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Index into the database row and decode a single value.
    ///
    /// # Panics
    ///
    /// Panics if the column does not exist or its value cannot be decoded into the requested
    /// type. See [`try_get`](Self::try_get) for a non-panicking version.
    #[track_caller]
    #[inline]
    pub fn get<T, I>(&self, index: I) -> T
    where
        I: ColumnIndex,
        T: Decode,
    {
        self.try_get::<T, I>(index).unwrap()
    }

    /// Index into the database row and decode a single value.
    ///
    /// # Errors
    ///
    ///  * [`ColumnNotFound`] if the column by the given name was not found.
    ///  * [`ColumnIndexOutOfBounds`] if the `usize` index was greater than the number of
    ///    columns in the row.
    ///  * [`ColumnDecode`] if the value could not be decoded into the requested type.
    ///
    /// [`ColumnDecode`]: Error::ColumnDecode
    /// [`ColumnNotFound`]: Error::ColumnNotFound
    /// [`ColumnIndexOutOfBounds`]: Error::ColumnIndexOutOfBounds
    pub fn try_get<T, I>(&self, index: I) -> Result<T, Error>
    where
        I: ColumnIndex,
        T: Decode,
    {
        let value = self.try_get_raw(&index)?.clone();

        T::decode(value).map_err(|source| Error::ColumnDecode {
            index: format!("{index:?}"),
            source,
        })
    }

    /// Index into the database row without decoding.
    pub fn try_get_raw<I>(&self, index: &I) -> Result<&Value, Error>
    where
        I: ColumnIndex,
    {
        let index = index.index(self)?;

        Ok(&self.values[index])
    }

    /// Consume the row, decoding the value at `index` without cloning it.
    pub fn take<T, I>(mut self, index: I) -> Result<T, Error>
    where
        I: ColumnIndex,
        T: Decode,
    {
        let position = index.index(&self)?;
        let value = std::mem::take(&mut self.values[position]);

        T::decode(value).map_err(|source| Error::ColumnDecode {
            index: format!("{index:?}"),
            source,
        })
    }
}

impl Debug for Row {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();

        for (name, value) in self.columns.iter().zip(&self.values) {
            map.entry(&name, value);
        }

        map.finish()
    }
}

/// A type that can be used to index into a [`Row`].
///
/// The [`get`] and [`try_get`] methods of [`Row`] accept any type that implements `ColumnIndex`.
/// This trait is implemented for strings which are used to look up a column by name, and for
/// `usize` which is used as a positional index into the row.
///
/// [`get`]: Row::get
/// [`try_get`]: Row::try_get
pub trait ColumnIndex: Debug {
    /// Returns a valid positional index into the row, [`ColumnIndexOutOfBounds`], or,
    /// [`ColumnNotFound`].
    ///
    /// [`ColumnNotFound`]: Error::ColumnNotFound
    /// [`ColumnIndexOutOfBounds`]: Error::ColumnIndexOutOfBounds
    fn index(&self, row: &Row) -> Result<usize, Error>;
}

impl ColumnIndex for usize {
    fn index(&self, row: &Row) -> Result<usize, Error> {
        if *self >= row.len() {
            return Err(Error::ColumnIndexOutOfBounds {
                len: row.len(),
                index: *self,
            });
        }

        Ok(*self)
    }
}

impl ColumnIndex for &'_ str {
    fn index(&self, row: &Row) -> Result<usize, Error> {
        row.columns
            .index_of(self)
            .ok_or_else(|| Error::ColumnNotFound((*self).into()))
    }
}

impl<I: ColumnIndex + ?Sized> ColumnIndex for &'_ I {
    #[inline]
    fn index(&self, row: &Row) -> Result<usize, Error> {
        (**self).index(row)
    }
}

//! Deferred result handles.
//!
//! A future is bound to one query of one batch. The first read executes the
//! whole batch, converts the query's rows and then drops the references to
//! the batch and query; later reads return the memoized value without
//! touching either.

use crate::batch::QueryBatch;
use crate::error::Error;
use crate::query::SharedQuery;
use crate::result::FromResultValue;

enum FutureState<T> {
    Pending { batch: QueryBatch, query: SharedQuery },
    Resolved(Vec<T>),
}

fn resolve<T: FromResultValue>(batch: &QueryBatch, query: &SharedQuery) -> Result<Vec<T>, Error> {
    batch.execute()?;
    let rows = query.lock().results()?;
    rows.into_iter().map(T::from_result_value).collect()
}

/// Handle to the full result list of a query.
pub struct FutureList<T> {
    state: FutureState<T>,
}

impl<T: FromResultValue> FutureList<T> {
    pub(crate) fn new(batch: QueryBatch, query: SharedQuery) -> Self {
        Self {
            state: FutureState::Pending { batch, query },
        }
    }

    /// Whether the value was already resolved.
    pub fn is_resolved(&self) -> bool {
        matches!(self.state, FutureState::Resolved(_))
    }

    /// Resolve, executing the batch on first access.
    ///
    /// On failure the handle stays pending.
    pub fn value(&mut self) -> Result<&[T], Error> {
        if let FutureState::Pending { batch, query } = &self.state {
            let values = resolve(batch, query)?;
            self.state = FutureState::Resolved(values);
        }
        self.resolved()
    }

    /// Resolve and take ownership of the values.
    pub fn into_value(mut self) -> Result<Vec<T>, Error> {
        self.value()?;
        match self.state {
            FutureState::Resolved(values) => Ok(values),
            FutureState::Pending { .. } => Err(Error::NotExecuted),
        }
    }

    fn resolved(&self) -> Result<&[T], Error> {
        match &self.state {
            FutureState::Resolved(values) => Ok(values),
            FutureState::Pending { .. } => Err(Error::NotExecuted),
        }
    }
}

#[cfg(feature = "async")]
impl<T: FromResultValue + Send + 'static> FutureList<T> {
    /// Resolve on the blocking thread pool.
    ///
    /// Same semantics as [`FutureList::value`]; the batch runs on a
    /// `spawn_blocking` thread so the calling task is not blocked.
    pub async fn value_async(&mut self) -> Result<&[T], Error> {
        if let FutureState::Pending { batch, query } = &self.state {
            let (batch, query) = (batch.clone(), query.clone());
            let values = tokio::task::spawn_blocking(move || resolve::<T>(&batch, &query))
                .await
                .map_err(|e| Error::Background(e.to_string()))??;
            self.state = FutureState::Resolved(values);
        }
        self.resolved()
    }
}

/// Handle to the first result of a query.
pub struct FutureValue<T> {
    list: FutureList<T>,
}

impl<T: FromResultValue> FutureValue<T> {
    pub(crate) fn new(batch: QueryBatch, query: SharedQuery) -> Self {
        Self {
            list: FutureList::new(batch, query),
        }
    }

    /// Whether the value was already resolved.
    pub fn is_resolved(&self) -> bool {
        self.list.is_resolved()
    }

    /// First row, or `None` when the query returned nothing.
    pub fn value(&mut self) -> Result<Option<&T>, Error> {
        Ok(self.list.value()?.first())
    }

    /// Resolve and take ownership of the first row.
    pub fn into_value(self) -> Result<Option<T>, Error> {
        Ok(self.list.into_value()?.into_iter().next())
    }
}

#[cfg(feature = "async")]
impl<T: FromResultValue + Send + 'static> FutureValue<T> {
    /// Resolve on the blocking thread pool.
    pub async fn value_async(&mut self) -> Result<Option<&T>, Error> {
        Ok(self.list.value_async().await?.first())
    }
}

/// Handle iterating the results of a query.
pub struct FutureEnumerable<T> {
    list: FutureList<T>,
}

impl<T: FromResultValue> FutureEnumerable<T> {
    pub(crate) fn new(batch: QueryBatch, query: SharedQuery) -> Self {
        Self {
            list: FutureList::new(batch, query),
        }
    }

    /// Whether the results were already resolved.
    pub fn is_resolved(&self) -> bool {
        self.list.is_resolved()
    }

    /// Iterate the results, executing the batch on first access.
    pub fn iter(&mut self) -> Result<std::slice::Iter<'_, T>, Error> {
        Ok(self.list.value()?.iter())
    }

    /// Resolve into an owning iterator.
    pub fn into_results(self) -> Result<std::vec::IntoIter<T>, Error> {
        Ok(self.list.into_value()?.into_iter())
    }
}

#[cfg(feature = "async")]
impl<T: FromResultValue + Send + 'static> FutureEnumerable<T> {
    /// Resolve on the blocking thread pool and iterate.
    pub async fn enumerable_async(&mut self) -> Result<std::slice::Iter<'_, T>, Error> {
        Ok(self.list.value_async().await?.iter())
    }
}

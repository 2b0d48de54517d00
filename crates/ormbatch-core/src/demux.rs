//! Result-set demultiplexing.
//!
//! The store returns result sets in the order commands were appended, and the
//! cursor is forward-only. Queries and their pending plans are therefore
//! walked in exactly the order their commands were built; each plan reads its
//! own result set and the cursor then moves to the next one.

use std::ops::DerefMut;

use crate::driver::ResultCursor;
use crate::error::Error;
use crate::query::QueryPlanProvider;
use crate::session::Session;

/// Feed every pending plan its result set. Returns the total rows read.
pub(crate) fn demultiplex<Q>(
    queries: &mut [Q],
    cursor: &mut dyn ResultCursor,
    session: &Session,
) -> Result<usize, Error>
where
    Q: DerefMut<Target = dyn QueryPlanProvider>,
{
    let mut total = 0;
    let mut set = 0;
    for query in queries.iter_mut() {
        for index in query.pending_plans() {
            session.check_cancelled()?;
            let rows = query.process_result_set(index, cursor)?;
            total += rows;
            tracing::trace!(
                result_set = set,
                query = %query.describe(),
                plan = index,
                rows,
                "demultiplexed result set"
            );
            cursor.next_result()?;
            set += 1;
        }
    }
    Ok(total)
}

//! Vector storage backends

pub mod mock;
pub mod qdrant;
pub mod traits;

use crate::VectorDataResult;
use futures::stream::{Stream, try_unfold};
use futures::TryStreamExt;
use traits::{PointRecord, ScrollRequest, VectorStore};
use uuid::Uuid;

/// Server-side page size for scrolls
pub const SCROLL_PAGE_SIZE: usize = 1000;

/// Maximum points per upsert request
pub const UPSERT_BATCH_SIZE: usize = 500;

/// Collection names carry their vector dimension as a suffix so a model
/// change lands in a fresh collection instead of colliding.
pub fn sized_collection_name(base: &str, vector_size: usize) -> String {
    format!("{base}_{vector_size}")
}

struct PageState {
    offset: Option<Uuid>,
    done: bool,
}

/// Lazily page through every point matching a scroll request.
///
/// The stream issues one `scroll` call per page and is safe to drop early;
/// nothing is prefetched beyond the current page.
pub fn scroll_all<'a>(
    store: &'a dyn VectorStore,
    collection: &'a str,
    request: ScrollRequest,
) -> impl Stream<Item = VectorDataResult<PointRecord>> + Send + 'a {
    let state = PageState {
        offset: None,
        done: false,
    };

    try_unfold(state, move |mut state| {
        let request = request.clone();
        async move {
            if state.done {
                return Ok(None);
            }
            let page = store.scroll(collection, &request, state.offset).await?;
            state.offset = page.next_offset;
            state.done = state.offset.is_none();
            if page.points.is_empty() && state.done {
                return Ok(None);
            }
            Ok(Some((page.points, state)))
        }
    })
    .map_ok(|points| futures::stream::iter(points.into_iter().map(Ok)))
    .try_flatten()
}

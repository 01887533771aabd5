use std::mem;

use tracing::debug;

use super::source::{BoundedQuery, Counting, SelfPaginating, Source};
use super::{Page, Pagination, PaginationConfig, PaginationError};

/// Slices sources into pages.
#[derive(Debug, Clone, Default)]
pub struct Paginator {
    config: PaginationConfig,
}

impl Paginator {
    pub fn new(config: PaginationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    /// Effective page size: the configured default when none is requested,
    /// clamped to the configured maximum when one is set.
    pub fn page_size(&self, requested: Option<usize>) -> Result<usize, PaginationError> {
        let size = requested.unwrap_or(self.config.default_page_size);
        if size == 0 {
            return Err(PaginationError::InvalidPageSize);
        }
        match self.config.max_page_size {
            0 => Ok(size),
            max => Ok(size.min(max)),
        }
    }

    /// Return `page` of `source`. Out-of-range pages are clamped into `[1, pages]`.
    pub fn paginate<T>(
        &self,
        source: Source<'_, T>,
        page: usize,
        page_size: Option<usize>,
    ) -> Result<Page<T>, PaginationError> {
        let page_size = self.page_size(page_size)?;
        let kind = source.kind();

        let result = match source {
            Source::Items(items) => {
                let len = items.len();
                slice_iter(items.into_iter(), len, page, page_size)
            }
            Source::Sequence { items, len } => slice_iter(items, len, page, page_size),
            Source::SelfPaginating(source) => slice_self_paginating(source, page, page_size)?,
            Source::Query(query) => slice_query(query, page, page_size)?,
        };

        log_page(kind, page, &result.pagination);
        Ok(result)
    }

    /// Return the first page on which `finder` matches an item, or page 1.
    ///
    /// `finder` receives the item, its 1-based virtual page, its 1-based
    /// position on that page, and the page size.
    pub fn paginate_with_finder<T, P>(
        &self,
        source: Source<'_, T>,
        page_size: Option<usize>,
        mut finder: P,
    ) -> Result<Page<T>, PaginationError>
    where
        P: FnMut(&T, usize, usize, usize) -> bool,
    {
        let page_size = self.page_size(page_size)?;
        let kind = source.kind();

        let result = match source {
            Source::Items(items) => {
                let page = Self::find_page(items.iter(), page_size, |item, virtual_page, on_page, size| {
                    finder(*item, virtual_page, on_page, size)
                });
                let len = items.len();
                slice_iter(items.into_iter(), len, page, page_size)
            }
            Source::Sequence { items, len } => find_in_sequence(items, len, page_size, finder),
            Source::SelfPaginating(source) => {
                let Some(all_items) = source.all_items() else {
                    return Err(PaginationError::unsupported(
                        "self-paginating source cannot enumerate all items for a page finder",
                    ));
                };
                let page = Self::find_page(all_items, page_size, &mut finder);
                slice_self_paginating(source, page, page_size)?
            }
            Source::Query(query) => {
                let items = query.execute().map_err(PaginationError::Source)?;
                let page = Self::find_page(items.iter(), page_size, |item, virtual_page, on_page, size| {
                    finder(*item, virtual_page, on_page, size)
                });
                slice_query(query, page, page_size)?
            }
        };

        log_page(kind, result.pagination.page, &result.pagination);
        Ok(result)
    }

    /// Scan `items` and return the virtual page of the first match, or 1.
    pub fn find_page<I, P>(items: I, page_size: usize, mut finder: P) -> usize
    where
        I: IntoIterator,
        P: FnMut(&I::Item, usize, usize, usize) -> bool,
    {
        let page_size = page_size.max(1);
        items
            .into_iter()
            .enumerate()
            .find_map(|(index, item)| {
                let virtual_page = index / page_size + 1;
                let on_page = index % page_size + 1;
                finder(&item, virtual_page, on_page, page_size).then_some(virtual_page)
            })
            .unwrap_or(1)
    }
}

fn log_page(kind: &str, requested: usize, pagination: &Pagination) {
    debug!(
        pagination = "paginator",
        source = kind,
        requested,
        page = pagination.page,
        pages = pagination.pages,
        page_count = pagination.page_count,
        item_count = pagination.item_count,
        "sliced source"
    );
}

fn slice_iter<T, I>(items: I, len: usize, page: usize, page_size: usize) -> Page<T>
where
    I: Iterator<Item = T>,
{
    let pagination = Pagination::new(len, page_size, page);
    let items: Vec<T> = items.skip(pagination.offset()).take(page_size).collect();
    Page {
        pagination: pagination.with_page_count(items.len()),
        items,
    }
}

fn slice_self_paginating<T>(
    source: &mut dyn SelfPaginating<Item = T>,
    page: usize,
    page_size: usize,
) -> Result<Page<T>, PaginationError> {
    match source.counting() {
        Counting::Eager => {
            let item_count = source.item_count().map_err(PaginationError::Source)?;
            let pagination = Pagination::new(item_count, page_size, page);
            let items = source
                .items_for(pagination.offset(), page_size)
                .map_err(PaginationError::Source)?;
            Ok(Page {
                pagination: pagination.with_page_count(items.len()),
                items,
            })
        }
        Counting::Late => {
            let requested_offset = page.max(1).saturating_sub(1).saturating_mul(page_size);
            let mut items = source
                .items_for(requested_offset, page_size)
                .map_err(PaginationError::Source)?;
            let item_count = source.item_count().map_err(PaginationError::Source)?;
            let pagination = Pagination::new(item_count, page_size, page);
            if pagination.offset() != requested_offset {
                items = source
                    .items_for(pagination.offset(), page_size)
                    .map_err(PaginationError::Source)?;
            }
            Ok(Page {
                pagination: pagination.with_page_count(items.len()),
                items,
            })
        }
    }
}

/// The page window is intersected with the limit/offset already on the query.
/// The query's own window is restored afterwards.
fn slice_query<T>(
    query: &mut dyn BoundedQuery<Item = T>,
    page: usize,
    page_size: usize,
) -> Result<Page<T>, PaginationError> {
    let item_count = query.count().map_err(PaginationError::Source)?;
    let pagination = Pagination::new(item_count, page_size, page);

    let base_offset = query.offset();
    let base_limit = query.limit();
    let window_offset = pagination.offset();
    let window_limit = match base_limit {
        Some(limit) => page_size.min(limit.saturating_sub(window_offset)),
        None => page_size,
    };

    query.set_offset(base_offset.saturating_add(window_offset));
    query.set_limit(Some(window_limit));
    let executed = query.execute();
    query.set_offset(base_offset);
    query.set_limit(base_limit);

    let items = executed.map_err(PaginationError::Source)?;
    Ok(Page {
        pagination: pagination.with_page_count(items.len()),
        items,
    })
}

/// Page finder over a lazy sequence. Holds at most the first page and the
/// page being scanned.
fn find_in_sequence<T, P>(
    items: impl Iterator<Item = T>,
    len: usize,
    page_size: usize,
    mut finder: P,
) -> Page<T>
where
    P: FnMut(&T, usize, usize, usize) -> bool,
{
    let mut first_page = Vec::new();
    let mut current = Vec::with_capacity(page_size);
    let mut found = None;

    for (index, item) in items.enumerate() {
        let virtual_page = index / page_size + 1;
        let on_page = index % page_size + 1;
        if on_page == 1 && index > 0 {
            if first_page.is_empty() {
                first_page = mem::take(&mut current);
            } else {
                current.clear();
            }
        }

        if found.is_none() && finder(&item, virtual_page, on_page, page_size) {
            found = Some(virtual_page);
        }
        current.push(item);

        if found.is_some() && current.len() == page_size {
            break;
        }
    }

    let (page, items) = match found {
        Some(page) => (page, current),
        None if first_page.is_empty() => (1, current),
        None => (1, first_page),
    };

    Page {
        pagination: Pagination::new(len, page_size, page).with_page_count(items.len()),
        items,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::pagination::source::SourceError;

    fn paginator() -> Paginator {
        Paginator::default()
    }

    #[test]
    fn array_page_is_clamped_to_last() {
        let items: Vec<u32> = (0..95).collect();
        let page = paginator()
            .paginate(Source::Items(items), 10, Some(30))
            .expect("paginate");

        assert_eq!(page.pagination.page, 4);
        assert_eq!(page.pagination.pages, 4);
        assert_eq!(page.pagination.page_count, 5);
        assert_eq!(page.items, vec![90, 91, 92, 93, 94]);
    }

    #[test]
    fn page_counts_sum_to_item_count() {
        let paginator = paginator();
        for item_count in [0usize, 1, 29, 30, 31, 95] {
            for page_size in [1usize, 7, 30] {
                let pages = Pagination::pages_for(item_count, page_size);
                assert_eq!(pages, item_count.div_ceil(page_size).max(1));

                let total: usize = (1..=pages)
                    .map(|page| {
                        paginator
                            .paginate(Source::Items((0..item_count).collect()), page, Some(page_size))
                            .expect("paginate")
                            .pagination
                            .page_count
                    })
                    .sum();
                assert_eq!(total, item_count, "item_count={item_count} page_size={page_size}");
            }
        }
    }

    #[test]
    fn default_paginator_honors_large_page_sizes() {
        let paginator = Paginator::default();
        let page = paginator
            .paginate(Source::Items((0..150).collect::<Vec<u32>>()), 1, Some(150))
            .expect("paginate");

        assert_eq!(page.pagination.pages, 1);
        assert_eq!(page.pagination.page_size, 150);
        assert_eq!(page.pagination.page_count, 150);
        assert_eq!(paginator.page_size(Some(10_000)).expect("unbounded"), 10_000);
    }

    #[test]
    fn page_size_defaults_and_clamps() {
        let paginator = Paginator::new(PaginationConfig {
            default_page_size: 10,
            max_page_size: 50,
        });
        assert_eq!(paginator.page_size(None).expect("default"), 10);
        assert_eq!(paginator.page_size(Some(500)).expect("clamped"), 50);
        assert!(matches!(
            paginator.page_size(Some(0)),
            Err(PaginationError::InvalidPageSize)
        ));
    }

    #[test]
    fn sequence_is_not_materialized() {
        let pulled = Rc::new(Cell::new(0usize));
        let counter = pulled.clone();
        let items = (0usize..).inspect(move |_| counter.set(counter.get() + 1));

        let page = paginator()
            .paginate(Source::counted(items, 1_000_000), 3, Some(10))
            .expect("paginate");

        assert_eq!(page.items, (20..30).collect::<Vec<_>>());
        assert_eq!(page.pagination.pages, 100_000);
        assert_eq!(pulled.get(), 30);
    }

    #[derive(Default)]
    struct Repository {
        rows: Vec<u32>,
        counting: Counting,
        calls: Vec<String>,
        enumerable: bool,
    }

    impl SelfPaginating for Repository {
        type Item = u32;

        fn items_for(&mut self, offset: usize, limit: usize) -> Result<Vec<u32>, SourceError> {
            self.calls.push(format!("items_for({offset},{limit})"));
            Ok(self.rows.iter().copied().skip(offset).take(limit).collect())
        }

        fn item_count(&mut self) -> Result<usize, SourceError> {
            self.calls.push("item_count".to_string());
            Ok(self.rows.len())
        }

        fn counting(&self) -> Counting {
            self.counting
        }

        fn all_items(&mut self) -> Option<Box<dyn Iterator<Item = u32> + '_>> {
            if !self.enumerable {
                return None;
            }
            Some(Box::new(self.rows.iter().copied()))
        }
    }

    #[test]
    fn eager_counting_counts_first() {
        let mut repository = Repository {
            rows: (0..50).collect(),
            ..Default::default()
        };

        let page = paginator()
            .paginate(Source::SelfPaginating(&mut repository), 2, Some(30))
            .expect("paginate");

        assert_eq!(page.pagination.page_count, 20);
        assert_eq!(repository.calls, vec!["item_count", "items_for(30,30)"]);
    }

    #[test]
    fn late_counting_finalizes_after_fetch() {
        let mut repository = Repository {
            rows: (0..12).collect(),
            counting: Counting::Late,
            ..Default::default()
        };

        let page = paginator()
            .paginate(Source::SelfPaginating(&mut repository), 1, Some(30))
            .expect("paginate");

        assert_eq!(repository.calls, vec!["items_for(0,30)", "item_count"]);
        assert_eq!(page.pagination.pages, 1);
        assert_eq!(page.pagination.page, 1);
        assert_eq!(page.pagination.page_count, 12);
        assert_eq!(page.pagination.item_count, 12);
    }

    #[test]
    fn late_counting_refetches_clamped_page() {
        let mut repository = Repository {
            rows: (0..12).collect(),
            counting: Counting::Late,
            ..Default::default()
        };

        let page = paginator()
            .paginate(Source::SelfPaginating(&mut repository), 3, Some(10))
            .expect("paginate");

        assert_eq!(page.pagination.page, 2);
        assert_eq!(page.items, vec![10, 11]);
        assert_eq!(
            repository.calls,
            vec!["items_for(20,10)", "item_count", "items_for(10,10)"]
        );
    }

    struct Query {
        rows: Vec<u32>,
        limit: Option<usize>,
        offset: usize,
        executed_windows: Vec<(usize, Option<usize>)>,
    }

    impl Query {
        fn new(rows: Vec<u32>) -> Self {
            Self {
                rows,
                limit: None,
                offset: 0,
                executed_windows: Vec::new(),
            }
        }

        fn window(&self) -> impl Iterator<Item = u32> + '_ {
            self.rows
                .iter()
                .copied()
                .skip(self.offset)
                .take(self.limit.unwrap_or(usize::MAX))
        }
    }

    impl BoundedQuery for Query {
        type Item = u32;

        fn count(&mut self) -> Result<usize, SourceError> {
            Ok(self.window().count())
        }

        fn limit(&self) -> Option<usize> {
            self.limit
        }

        fn offset(&self) -> usize {
            self.offset
        }

        fn set_limit(&mut self, limit: Option<usize>) {
            self.limit = limit;
        }

        fn set_offset(&mut self, offset: usize) {
            self.offset = offset;
        }

        fn execute(&mut self) -> Result<Vec<u32>, SourceError> {
            self.executed_windows.push((self.offset, self.limit));
            Ok(self.window().collect())
        }
    }

    #[test]
    fn query_window_respects_existing_caps() {
        let mut query = Query::new((0..100).collect());
        query.set_offset(10);
        query.set_limit(Some(25));

        let page = paginator()
            .paginate(Source::Query(&mut query), 3, Some(10))
            .expect("paginate");

        assert_eq!(page.pagination.item_count, 25);
        assert_eq!(page.pagination.pages, 3);
        assert_eq!(page.items, vec![30, 31, 32, 33, 34]);
        assert_eq!(page.pagination.page_count, 5);
        assert_eq!(query.executed_windows, vec![(30, Some(5))]);
        assert_eq!((query.offset, query.limit), (10, Some(25)));
    }

    #[test]
    fn query_without_caps() {
        let mut query = Query::new((0..45).collect());

        let page = paginator()
            .paginate(Source::Query(&mut query), 2, Some(20))
            .expect("paginate");

        assert_eq!(page.items, (20..40).collect::<Vec<_>>());
        assert_eq!(query.limit, None);
    }

    #[test]
    fn find_page_returns_page_of_match() {
        for index in [0usize, 29, 30, 94] {
            let page = Paginator::find_page(0..95usize, 30, |item, _, _, _| *item == index);
            assert_eq!(page, index / 30 + 1);
        }
        assert_eq!(Paginator::find_page(0..95usize, 30, |_, _, _, _| false), 1);
    }

    #[test]
    fn finder_reports_position_on_page() {
        let mut seen = Vec::new();
        Paginator::find_page(0..5u32, 2, |_, page, on_page, size| {
            seen.push((page, on_page, size));
            false
        });
        assert_eq!(seen, vec![(1, 1, 2), (1, 2, 2), (2, 1, 2), (2, 2, 2), (3, 1, 2)]);
    }

    #[test]
    fn finder_on_items_and_sequence_agree() {
        let paginator = paginator();
        let items: Vec<u32> = (0..95).collect();

        let from_items = paginator
            .paginate_with_finder(Source::Items(items.clone()), Some(30), |item, _, _, _| *item == 64)
            .expect("items");
        let from_sequence = paginator
            .paginate_with_finder(Source::sequence(items.into_iter()), Some(30), |item, _, _, _| {
                *item == 64
            })
            .expect("sequence");

        assert_eq!(from_items.pagination.page, 3);
        assert_eq!(from_items, from_sequence);
        assert_eq!(from_sequence.items.first(), Some(&60));
        assert_eq!(from_sequence.pagination.page_count, 30);
    }

    #[test]
    fn finder_on_sequence_without_match_returns_first_page() {
        let page = paginator()
            .paginate_with_finder(Source::sequence(0..95u32), Some(30), |_, _, _, _| false)
            .expect("sequence");

        assert_eq!(page.pagination.page, 1);
        assert_eq!(page.items, (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn finder_uses_all_items_of_self_paginating_source() {
        let mut repository = Repository {
            rows: (0..50).collect(),
            enumerable: true,
            ..Default::default()
        };

        let page = paginator()
            .paginate_with_finder(Source::SelfPaginating(&mut repository), Some(20), |item, _, _, _| {
                *item == 45
            })
            .expect("paginate");

        assert_eq!(page.pagination.page, 3);
        assert_eq!(page.items, (40..50).collect::<Vec<_>>());
    }

    #[test]
    fn finder_requires_enumerable_self_paginating_source() {
        let mut repository = Repository::default();

        let err = paginator()
            .paginate_with_finder(Source::SelfPaginating(&mut repository), None, |_, _, _, _| true)
            .expect_err("not enumerable");
        assert!(matches!(err, PaginationError::UnsupportedSource(_)));
    }

    #[test]
    fn finder_on_query() {
        let mut query = Query::new((0..45).collect());

        let page = paginator()
            .paginate_with_finder(Source::Query(&mut query), Some(20), |item, _, _, _| *item == 41)
            .expect("paginate");

        assert_eq!(page.pagination.page, 3);
        assert_eq!(page.items, vec![40, 41, 42, 43, 44]);
    }

    struct Broken;

    impl SelfPaginating for Broken {
        type Item = u32;

        fn items_for(&mut self, _offset: usize, _limit: usize) -> Result<Vec<u32>, SourceError> {
            Err("connection reset".into())
        }

        fn item_count(&mut self) -> Result<usize, SourceError> {
            Ok(10)
        }
    }

    #[test]
    fn source_failure_is_wrapped() {
        let err = paginator()
            .paginate(Source::SelfPaginating(&mut Broken), 1, None)
            .expect_err("source fails");
        assert!(matches!(err, PaginationError::Source(_)));
        assert!(err.to_string().contains("connection reset"));
    }
}

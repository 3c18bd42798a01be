//! Paging and sorting for list operations.

use serde::{Deserialize, Serialize};
use service_core::error::{AppError, ErrorDomain};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

/// Requested window of a listing. Out-of-range values are normalized, not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pager {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    DEFAULT_PAGE
}

fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

impl Default for Pager {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl Pager {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page, per_page }.normalized()
    }

    pub fn normalized(self) -> Self {
        let page = self.page.max(1);
        let per_page = match self.per_page {
            0 => DEFAULT_PER_PAGE,
            n => n.min(MAX_PER_PAGE),
        };
        Self { page, per_page }
    }

    pub fn offset(&self) -> i64 {
        let pager = self.normalized();
        (pager.page as i64 - 1) * pager.per_page as i64
    }

    pub fn limit(&self) -> i64 {
        self.normalized().per_page as i64
    }

    /// Paginator describing this window over `total` rows.
    pub fn paginate(&self, total: i64) -> Paginator {
        let pager = self.normalized();
        Paginator {
            page: pager.page,
            per_page: pager.per_page,
            total,
            has_next_page: self.offset() + self.limit() < total,
        }
    }
}

/// Requested ordering. An empty field selects the entity's default column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sorter {
    #[serde(default, rename = "sort")]
    pub field: String,
    #[serde(default)]
    pub desc: bool,
}

impl Sorter {
    pub fn new(field: impl Into<String>, desc: bool) -> Self {
        Self {
            field: field.into(),
            desc,
        }
    }

    pub fn asc(&self) -> bool {
        !self.desc
    }

    /// Resolve the field against an entity's sortable columns.
    ///
    /// The returned name comes from `allowed`, never from the request, so it is
    /// safe to splice into an `ORDER BY` clause.
    pub fn column(
        &self,
        allowed: &[&'static str],
        default: &'static str,
    ) -> Result<&'static str, AppError> {
        let field = self.field.trim();
        if field.is_empty() {
            return Ok(default);
        }
        allowed
            .iter()
            .copied()
            .find(|candidate| *candidate == field)
            .ok_or_else(|| {
                AppError::conflict(ErrorDomain::DataAccess, "Invalid sort field")
                    .with_cause(anyhow::anyhow!("Cannot sort by '{}'", field))
            })
    }

    pub fn direction(&self) -> &'static str {
        if self.desc {
            "DESC"
        } else {
            "ASC"
        }
    }
}

/// Position of a page within a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginator {
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
    pub has_next_page: bool,
}

impl Paginator {
    pub fn total_pages(&self) -> i64 {
        if self.per_page == 0 {
            return 0;
        }
        let per_page = self.per_page as i64;
        (self.total + per_page - 1) / per_page
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub paginator: Paginator,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, paginator: Paginator) -> Self {
        Self { items, paginator }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            paginator: self.paginator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::error::ErrorKind;

    #[test]
    fn test_pager_normalizes() {
        let pager = Pager::new(0, 0);
        assert_eq!(pager.page, 1);
        assert_eq!(pager.per_page, DEFAULT_PER_PAGE);

        let pager = Pager::new(3, 500);
        assert_eq!(pager.per_page, MAX_PER_PAGE);
        assert_eq!(pager.offset(), 200);
    }

    #[test]
    fn test_has_next_page() {
        let pager = Pager::new(1, 10);
        assert!(pager.paginate(11).has_next_page);
        assert!(!pager.paginate(10).has_next_page);

        let pager = Pager::new(2, 10);
        assert!(!pager.paginate(20).has_next_page);
        assert!(pager.paginate(21).has_next_page);
    }

    #[test]
    fn test_total_pages() {
        let paginator = Pager::new(1, 20).paginate(41);
        assert_eq!(paginator.total_pages(), 3);
        assert_eq!(Pager::new(1, 20).paginate(0).total_pages(), 0);
    }

    #[test]
    fn test_sorter_whitelist() {
        let allowed = ["name", "created_on"];
        assert_eq!(Sorter::default().column(&allowed, "name").unwrap(), "name");
        assert_eq!(
            Sorter::new("created_on", true).column(&allowed, "name").unwrap(),
            "created_on"
        );

        let err = Sorter::new("passwd; DROP TABLE users", false)
            .column(&allowed, "name")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}

use serde::{Deserialize, Serialize};

pub const MAX_LIMIT: i64 = 100;

/// Raw `page`, `limit` and `cursor` query parameters; unparsable numbers fall back to defaults.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageParams {
    pub page: i64,
    pub limit: i64,
    pub cursor: Option<String>,
}

impl PageQuery {
    pub fn resolve(&self, default_limit: i64) -> PageParams {
        self.resolve_with_max(default_limit, MAX_LIMIT)
    }

    pub fn resolve_with_max(&self, default_limit: i64, max_limit: i64) -> PageParams {
        let page = parse_number(self.page.as_deref())
            .filter(|page| *page >= 1)
            .unwrap_or(1);
        let limit = parse_number(self.limit.as_deref())
            .unwrap_or(default_limit)
            .clamp(1, max_limit);
        let cursor = self
            .cursor
            .as_deref()
            .map(str::trim)
            .filter(|cursor| !cursor.is_empty())
            .map(str::to_string);
        PageParams {
            page,
            limit,
            cursor,
        }
    }
}

fn parse_number(value: Option<&str>) -> Option<i64> {
    value.and_then(|value| value.trim().parse::<i64>().ok())
}

impl PageParams {
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn is_cursor(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn cache_token(&self) -> String {
        match &self.cursor {
            Some(cursor) => cursor.clone(),
            None => format!("page:{}", self.page),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl Pagination {
    pub fn offset(params: &PageParams, total: i64) -> Self {
        Self {
            page: params.page,
            limit: params.limit,
            total: Some(total),
            total_pages: Some(total_pages(total, params.limit)),
            next_cursor: None,
        }
    }

    /// `total` is only known for offset pages; `nextCursor` is set when the page is full.
    pub fn build(params: &PageParams, total: Option<i64>, fetched: usize, last_id: Option<&str>) -> Self {
        let next_cursor = if fetched as i64 == params.limit {
            last_id.map(str::to_string)
        } else {
            None
        };
        Self {
            page: params.page,
            limit: params.limit,
            total,
            total_pages: total.map(|total| total_pages(total, params.limit)),
            next_cursor,
        }
    }
}

pub fn total_pages(total: i64, limit: i64) -> i64 {
    if limit <= 0 {
        return 0;
    }
    (total + limit - 1) / limit
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

//! ORDER BY and paging clauses.

use stratum_core::Result;

/// An ORDER BY term over a mapped property.
#[derive(Debug, Clone)]
pub struct OrderBy {
    /// Property name.
    pub property: String,
    /// Descending order.
    pub desc: bool,
}

impl OrderBy {
    /// Ascending order on a property.
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            desc: false,
        }
    }

    /// Descending order on a property.
    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            desc: true,
        }
    }

    /// Render to SQL via the plan's column resolver.
    pub fn build(&self, column_of: &dyn Fn(&str) -> Result<String>) -> Result<String> {
        let column = column_of(&self.property)?;
        Ok(if self.desc {
            format!("{column} DESC")
        } else {
            column
        })
    }
}

/// LIMIT/OFFSET paging.
#[derive(Debug, Clone, Copy, Default)]
pub struct Paging {
    /// Maximum number of rows, if bounded.
    pub limit: Option<u64>,
    /// Number of rows to skip.
    pub offset: Option<u64>,
}

impl Paging {
    /// No paging.
    pub fn none() -> Self {
        Self::default()
    }

    /// Limit the row count.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Skip leading rows.
    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Render the trailing LIMIT/OFFSET fragment (empty when unused).
    pub fn build(&self) -> String {
        let mut sql = String::new();
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        sql
    }
}

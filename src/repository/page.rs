use super::Record;

/// Page name used in pagination links.
pub const PAGE_NAME: &str = "current";

/// One page of rows plus the bookkeeping needed for links.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    pub items: Vec<Record>,
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    pub path: String,
}

impl Page {
    pub fn new(items: Vec<Record>, total: u64, per_page: u64, current_page: u64) -> Self {
        Page {
            items,
            total,
            per_page: per_page.max(1),
            current_page: current_page.max(1),
            path: "/".into(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn last_page(&self) -> u64 {
        self.total.div_ceil(self.per_page).max(1)
    }

    /// 1-based index of the first row on this page; `None` when empty.
    pub fn first_item(&self) -> Option<u64> {
        if self.items.is_empty() {
            None
        } else {
            Some((self.current_page - 1) * self.per_page + 1)
        }
    }

    pub fn last_item(&self) -> Option<u64> {
        self.first_item()
            .map(|first| first + self.items.len() as u64 - 1)
    }

    pub fn has_more_pages(&self) -> bool {
        self.current_page < self.last_page()
    }

    pub fn url(&self, page: u64) -> String {
        format!("{}?{}={}", self.path, PAGE_NAME, page.max(1))
    }

    pub fn next_page_url(&self) -> Option<String> {
        self.has_more_pages().then(|| self.url(self.current_page + 1))
    }

    pub fn previous_page_url(&self) -> Option<String> {
        (self.current_page > 1).then(|| self.url(self.current_page - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize) -> Vec<Record> {
        (0..n).map(|_| Record::new()).collect()
    }

    #[test]
    fn bounds_of_a_middle_page() {
        let page = Page::new(rows(15), 40, 15, 2).with_path("/users");
        assert_eq!(page.first_item(), Some(16));
        assert_eq!(page.last_item(), Some(30));
        assert_eq!(page.last_page(), 3);
        assert_eq!(page.next_page_url().as_deref(), Some("/users?current=3"));
        assert_eq!(page.previous_page_url().as_deref(), Some("/users?current=1"));
    }

    #[test]
    fn empty_result_has_one_page_and_no_bounds() {
        let page = Page::new(Vec::new(), 0, 15, 1);
        assert_eq!(page.last_page(), 1);
        assert_eq!(page.first_item(), None);
        assert_eq!(page.next_page_url(), None);
        assert_eq!(page.previous_page_url(), None);
    }
}

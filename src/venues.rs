use std::collections::BTreeMap;

/// Static mapping from (venue name, item name) to the page-element id of the
/// matching venue-item tab. Kept in sync with the portal's markup by hand;
/// passed explicitly into the booking flow rather than read as ambient state.
#[derive(Debug, Clone)]
pub struct VenueTable {
    tabs: BTreeMap<(String, String), String>,
}

impl VenueTable {
    pub fn empty() -> Self {
        Self {
            tabs: BTreeMap::new(),
        }
    }

    pub fn with_entry(
        mut self,
        venue: impl Into<String>,
        item: impl Into<String>,
        tab_id: impl Into<String>,
    ) -> Self {
        self.tabs
            .insert((venue.into(), item.into()), tab_id.into());
        self
    }

    pub fn tab_id(&self, venue: &str, item: &str) -> Option<&str> {
        self.tabs
            .get(&(venue.to_string(), item.to_string()))
            .map(String::as_str)
    }

    /// One line per venue, listing its bookable items. Shown by the CLI.
    pub fn render(&self) -> String {
        let mut by_venue: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (venue, item) in self.tabs.keys() {
            by_venue.entry(venue).or_default().push(item);
        }
        by_venue
            .into_iter()
            .map(|(venue, items)| format!("{venue}: {{ {} }}", items.join(", ")))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for VenueTable {
    fn default() -> Self {
        Self::empty()
            .with_entry("学生服务中心", "学生中心健身房", "tab-0")
            .with_entry("子衿街学生活动中心", "健身房", "tab-0")
            .with_entry("子衿街学生活动中心", "桌游室", "tab-1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_hits_and_misses() {
        let table = VenueTable::default();
        assert_eq!(table.tab_id("学生服务中心", "学生中心健身房"), Some("tab-0"));
        assert_eq!(table.tab_id("学生服务中心", "保龄球馆"), None);
        assert_eq!(table.tab_id("不存在的场馆", "健身房"), None);
    }

    #[test]
    fn render_groups_items_by_venue() {
        let table = VenueTable::empty()
            .with_entry("A馆", "羽毛球", "tab-0")
            .with_entry("A馆", "乒乓球", "tab-1")
            .with_entry("B馆", "健身房", "tab-0");
        let rendered = table.render();
        assert_eq!(rendered.lines().count(), 2);
        assert!(rendered.contains("A馆: { 乒乓球, 羽毛球 }"));
        assert!(rendered.contains("B馆: { 健身房 }"));
    }
}

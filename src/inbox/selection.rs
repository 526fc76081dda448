use crate::api::models::{ConversationQuery, Filters};

/// Picks the active conversation from the visible list.
///
/// An explicit selector wins when it is on the list, then the previous
/// selection, then the first entry. Membership is by id, not position.
pub fn resolve(explicit_id: Option<&str>, filtered: &[String], previous_id: Option<&str>) -> Option<String> {
    let contains = |id: &str| filtered.iter().any(|candidate| candidate == id);
    if let Some(id) = explicit_id.filter(|id| contains(id)) {
        return Some(id.to_string());
    }
    if let Some(id) = previous_id.filter(|id| contains(id)) {
        return Some(id.to_string());
    }
    filtered.first().cloned()
}

/// Which conversation, page and filters are currently active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionState {
    /// Selector projected from the address bar.
    pub explicit_id: Option<String>,
    pub active_conversation_id: Option<String>,
    pub current_page: u32,
    pub filters: Filters,
    filters_generation: u64,
    /// Filters generation the cached list was fetched under.
    listed_generation: u64,
    /// Filters generation of the list the active id was picked from.
    active_generation: u64,
}

impl Default for SelectionState {
    fn default() -> Self {
        Self {
            explicit_id: None,
            active_conversation_id: None,
            current_page: 1,
            filters: Filters::default(),
            filters_generation: 0,
            listed_generation: 0,
            active_generation: 0,
        }
    }
}

impl SelectionState {
    /// Bumped on every filter change.
    pub fn generation(&self) -> u64 {
        self.filters_generation
    }

    pub fn query(&self) -> ConversationQuery {
        ConversationQuery { page: self.current_page, filters: self.filters.clone() }
    }

    /// Replaces the filters and returns to the first page. The current
    /// selection stops counting as "previous" for the next resolve.
    pub fn set_filters(&mut self, filters: Filters) -> bool {
        if self.filters == filters && self.current_page == 1 {
            return false;
        }
        if self.filters != filters {
            self.filters = filters;
            self.filters_generation += 1;
        }
        self.current_page = 1;
        true
    }

    pub fn set_page(&mut self, page: u32, total_pages: u32) -> bool {
        let page = page.clamp(1, total_pages.max(1));
        if page == self.current_page {
            return false;
        }
        self.current_page = page;
        true
    }

    /// The previous selection, if it was made under the current filters.
    pub fn previous_id(&self) -> Option<&str> {
        if self.active_generation != self.filters_generation {
            return None;
        }
        self.active_conversation_id.as_deref()
    }

    /// Records that the cached list now holds the answer to a query made
    /// under filters generation `generation`.
    pub fn listed(&mut self, generation: u64) {
        self.listed_generation = generation;
    }

    /// Re-runs the resolver against `visible` and records the outcome.
    /// A pick made from a list fetched under older filters stays tagged
    /// with that list's generation, so it never counts as "previous" once
    /// the list for the current filters arrives.
    pub fn reselect(&mut self, visible: &[String]) -> Option<String> {
        let selected = resolve(self.explicit_id.as_deref(), visible, self.previous_id());
        self.active_conversation_id = selected.clone();
        self.active_generation = self.listed_generation;
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::Channel;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn explicit_id_on_list_wins() {
        let list = ids(&["c1", "c2", "c3"]);
        assert_eq!(resolve(Some("c3"), &list, Some("c2")), Some("c3".into()));
    }

    #[test]
    fn previous_kept_when_explicit_missing() {
        let list = ids(&["c1", "c2", "c3"]);
        assert_eq!(resolve(Some("c9"), &list, Some("c2")), Some("c2".into()));
        assert_eq!(resolve(None, &list, Some("c2")), Some("c2".into()));
    }

    #[test]
    fn falls_back_to_first_then_none() {
        assert_eq!(resolve(None, &ids(&["c4", "c5"]), Some("c1")), Some("c4".into()));
        assert_eq!(resolve(Some("c1"), &[], Some("c1")), None);
    }

    #[test]
    fn membership_ignores_position() {
        let before = ids(&["c1", "c2", "c3"]);
        let after = ids(&["c3", "c1", "c2"]);
        assert_eq!(resolve(None, &before, Some("c2")), Some("c2".into()));
        assert_eq!(resolve(None, &after, Some("c2")), Some("c2".into()));
    }

    #[test]
    fn filter_change_invalidates_previous_selection() {
        let mut state = SelectionState::default();
        state.reselect(&ids(&["c1", "c2"]));
        state.explicit_id = None;
        state.active_conversation_id = Some("c2".into());
        assert_eq!(state.previous_id(), Some("c2"));

        assert!(state.set_filters(Filters { channel: Some(Channel::Tiktok), ..Filters::default() }));
        assert_eq!(state.previous_id(), None);
        state.listed(state.generation());
        assert_eq!(state.reselect(&ids(&["c7", "c2"])), Some("c7".into()));
        assert_eq!(state.previous_id(), Some("c7"));
    }

    #[test]
    fn pick_from_old_list_does_not_survive_filter_change() {
        let mut state = SelectionState::default();
        state.reselect(&ids(&["c1", "c2"]));
        state.set_filters(Filters { channel: Some(Channel::Instagram), ..Filters::default() });

        // Re-resolved before the list for the new filters arrived.
        assert_eq!(state.reselect(&ids(&["c1", "c2"])), Some("c1".into()));
        assert_eq!(state.previous_id(), None);

        state.listed(state.generation());
        assert_eq!(state.reselect(&ids(&["c5", "c1"])), Some("c5".into()));
        assert_eq!(state.previous_id(), Some("c5"));
    }

    #[test]
    fn set_page_clamps_to_known_range() {
        let mut state = SelectionState::default();
        assert!(state.set_page(9, 3));
        assert_eq!(state.current_page, 3);
        assert!(state.set_page(0, 3));
        assert_eq!(state.current_page, 1);
        assert!(!state.set_page(1, 3));
    }
}

use crate::model::view::SortKey;

/// Changes a caller can make to its `ViewState`.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewAction {
    SortBy(SortKey),
    ToggleExpanded(u32),
    ExpandAll,
    CollapseAll,
    UpdateFilter(String),
    ClearFilter,
    ToggleTreeMode,
}

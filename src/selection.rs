// ABOUTME: Model selection for partial replication runs
// ABOUTME: Composable include/exclude lists plus the injection order hint

/// Which models a run touches, and in what order.
///
/// Include and exclude compose: a model passes when it is on the include list
/// (or no include list is set) and not on the exclude list. Names that match
/// no known model are ignored, not errors. The order hint front-loads models
/// the caller needs applied first (foreign-key parents, typically); everything
/// else follows in discovery order.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    include: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
    order: Vec<String>,
}

impl Selection {
    pub fn new(include: Option<Vec<String>>, exclude: Option<Vec<String>>) -> Self {
        Self {
            include,
            exclude,
            order: Vec::new(),
        }
    }

    /// Replicate everything, in discovery order.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_order(mut self, order: Vec<String>) -> Self {
        self.order = order;
        self
    }

    pub fn allows(&self, model: &str) -> bool {
        if let Some(include) = &self.include {
            if !include.iter().any(|m| m == model) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.iter().any(|m| m == model) {
                return false;
            }
        }
        true
    }

    /// Order and filter a discovered model list.
    ///
    /// Hinted models come first (only those actually discovered), the rest
    /// keep their discovery order, and include/exclude applies to both.
    pub fn apply(&self, discovered: impl IntoIterator<Item = String>) -> Vec<String> {
        let discovered: Vec<String> = discovered.into_iter().collect();
        let mut selected: Vec<String> = self
            .order
            .iter()
            .filter(|m| discovered.contains(*m))
            .cloned()
            .collect();
        selected.dedup();
        for model in discovered {
            if !selected.contains(&model) {
                selected.push(model);
            }
        }
        selected.retain(|m| self.allows(m));
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovered() -> Vec<String> {
        vec!["orders".into(), "users".into(), "tags".into()]
    }

    #[test]
    fn test_no_filters_keeps_discovery_order() {
        let selected = Selection::all().apply(discovered());
        assert_eq!(selected, discovered());
    }

    #[test]
    fn test_include_and_exclude_compose() {
        let selection = Selection::new(
            Some(vec!["orders".into(), "users".into()]),
            Some(vec!["users".into()]),
        );
        assert_eq!(selection.apply(discovered()), vec!["orders".to_string()]);
    }

    #[test]
    fn test_order_hint_front_loads_models() {
        let selection = Selection::all().with_order(vec!["tags".into(), "users".into()]);
        assert_eq!(
            selection.apply(discovered()),
            vec!["tags".to_string(), "users".to_string(), "orders".to_string()]
        );
    }

    #[test]
    fn test_unknown_names_are_ignored() {
        let selection = Selection::new(Some(vec!["orders".into(), "ghost".into()]), None)
            .with_order(vec!["phantom".into()]);
        assert_eq!(selection.apply(discovered()), vec!["orders".to_string()]);
    }
}

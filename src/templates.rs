use super::*;

/// The active block template plus the last few retired ones. Submissions
/// against a retired height still validate (propagation takes a moment);
/// anything older is expired.
#[derive(Debug)]
pub(crate) struct TemplateStore {
    active: Option<Arc<BlockTemplate>>,
    past: Ring<Arc<BlockTemplate>>,
}

impl TemplateStore {
    pub(crate) fn new() -> Self {
        Self {
            active: None,
            past: Ring::new(RETAINED_TEMPLATES),
        }
    }

    /// Adopts a template if its previous hash differs from the active one,
    /// archiving the current template. Returns the new active template, or
    /// `None` when the raw template is already active.
    pub(crate) fn adopt(&mut self, raw: RawTemplate) -> Result<Option<Arc<BlockTemplate>>> {
        let template = BlockTemplate::from_raw(raw)?;

        if let Some(active) = &self.active {
            if active.previous_hash == template.previous_hash {
                return Ok(None);
            }
        }

        let template = Arc::new(template);

        if let Some(previous) = self.active.replace(template.clone()) {
            self.past.push(previous);
        }

        info!(
            "New block to mine at height {} with difficulty {}",
            template.height, template.difficulty
        );

        Ok(Some(template))
    }

    pub(crate) fn active(&self) -> Option<Arc<BlockTemplate>> {
        self.active.clone()
    }

    /// Finds the template a job was issued against, searching the active
    /// template first and then the bounded history.
    pub(crate) fn resolve(&self, height: u64) -> Option<Arc<BlockTemplate>> {
        if let Some(active) = &self.active {
            if active.height == height {
                return Some(active.clone());
            }
        }

        self.past
            .iter()
            .find(|template| template.height == height)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::block_template::tests::test_raw_template};

    #[test]
    fn first_adopt_activates() {
        let mut store = TemplateStore::new();

        let adopted = store.adopt(test_raw_template(100, 1000, 1)).unwrap();

        assert!(adopted.is_some());
        assert_eq!(store.active().unwrap().height, 100);
    }

    #[test]
    fn adopt_same_previous_hash_is_a_noop() {
        let mut store = TemplateStore::new();

        store.adopt(test_raw_template(100, 1000, 1)).unwrap();
        let again = store.adopt(test_raw_template(100, 1000, 1)).unwrap();

        assert!(again.is_none());
        assert_eq!(store.active().unwrap().height, 100);
    }

    #[test]
    fn adopt_archives_previous() {
        let mut store = TemplateStore::new();

        store.adopt(test_raw_template(100, 1000, 1)).unwrap();
        store.adopt(test_raw_template(101, 1000, 2)).unwrap();

        assert_eq!(store.active().unwrap().height, 101);
        assert!(store.resolve(100).is_some());
        assert!(store.resolve(101).is_some());
    }

    #[test]
    fn history_depth_is_bounded() {
        let mut store = TemplateStore::new();

        for (i, height) in (100..106).enumerate() {
            store
                .adopt(test_raw_template(height, 1000, i as u8))
                .unwrap();
        }

        // Active is 105, history holds 101..=104; 100 has expired.
        assert!(store.resolve(100).is_none());
        for height in 101..=105 {
            assert!(store.resolve(height).is_some(), "height {height} retained");
        }
    }

    #[test]
    fn resolve_unknown_height() {
        let mut store = TemplateStore::new();
        assert!(store.resolve(100).is_none());

        store.adopt(test_raw_template(100, 1000, 1)).unwrap();
        assert!(store.resolve(99).is_none());
    }

    #[test]
    fn invalid_template_is_an_error_not_a_swap() {
        let mut store = TemplateStore::new();
        store.adopt(test_raw_template(100, 1000, 1)).unwrap();

        let bogus = RawTemplate {
            blob: "00".into(),
            difficulty: 1,
            height: 101,
            reserved_offset: 0,
        };

        assert!(store.adopt(bogus).is_err());
        assert_eq!(store.active().unwrap().height, 100);
    }
}

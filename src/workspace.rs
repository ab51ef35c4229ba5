use std::any::Any;

/// A workspace that contains type-erased objects.
///
/// The workspace holds intermediate buffers reused across kernel invocations on the same
/// thread. Lookup is fastest when the same type is requested many times in a row, which is the
/// typical pattern for a kernel processing one element after another.
#[derive(Debug, Default)]
pub struct Workspace {
    workspaces: Vec<Box<dyn Any + Send>>,
}

impl Workspace {
    pub fn get_or_insert_with<W, F>(&mut self, create: F) -> &mut W
    where
        W: 'static + Send,
        F: FnOnce() -> W,
    {
        // The Vec is treated as a stack, so search from the end
        let existing_ws_idx = self.workspaces.iter().rposition(|ws| ws.is::<W>());
        let idx = match existing_ws_idx {
            Some(idx) => idx,
            None => {
                self.workspaces.push(Box::new(create()));
                self.workspaces.len() - 1
            }
        };

        // Move the entry to the top of the stack so that repeated lookups of the same type
        // succeed immediately
        let last = self.workspaces.len() - 1;
        self.workspaces.swap(idx, last);

        self.workspaces[last]
            .downcast_mut()
            .expect("Internal error: Downcasting can by definition not fail")
    }

    pub fn get_or_default<W>(&mut self) -> &mut W
    where
        W: 'static + Send + Default,
    {
        self.get_or_insert_with(Default::default)
    }
}

/// A pair of scratch buffers for ping-ponging between contraction passes.
#[derive(Debug)]
pub struct PassBuffers<T> {
    pub buffers: [Vec<T>; 2],
}

impl<T> Default for PassBuffers<T> {
    fn default() -> Self {
        Self {
            buffers: [Vec::new(), Vec::new()],
        }
    }
}

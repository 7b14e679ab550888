//! Entry points for the UI side. Each one stamps the time and the kind and
//! hands the event to the batcher.

use super::event::{ClickPayload, EventPayload, TreeNodeEdit};
use super::service::TelemetryService;

impl TelemetryService {
    pub fn enqueue_click(&self, click: ClickPayload) {
        self.enqueue(self.stamp(EventPayload::Click(click)));
    }

    pub fn enqueue_tree_node_edit(&self, edit: TreeNodeEdit) {
        self.enqueue(self.stamp(EventPayload::TreeNode(edit)));
    }
}

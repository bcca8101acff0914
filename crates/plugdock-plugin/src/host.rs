//! Collaborator traits implemented by the embedding application.

use plugdock_core::Side;

use crate::types::{Panel, PanelHandle};

/// The window that renders plugin panels.
pub trait PanelHost {
    /// Mount `panel` as a tab labelled with `plugin_label` on `side`.
    fn mount_panel(&mut self, panel: &Panel, plugin_label: &str, side: Side) -> PanelHandle;

    /// Unmount every panel mounted for the plugin called `name`.
    fn unmount_all_panels_for_plugin(&mut self, name: &str);
}

impl<H: PanelHost + ?Sized> PanelHost for &mut H {
    fn mount_panel(&mut self, panel: &Panel, plugin_label: &str, side: Side) -> PanelHandle {
        (**self).mount_panel(panel, plugin_label, side)
    }

    fn unmount_all_panels_for_plugin(&mut self, name: &str) {
        (**self).unmount_all_panels_for_plugin(name)
    }
}

use crate::define_id_type;

define_id_type!(TestId);
define_id_type!(GroupId);

/// Index of a single unit (processor or device) handed out by a [`ResourcePool`].
///
/// [`ResourcePool`]: crate::resources::ResourcePool
pub type ResourceIndex = u32;

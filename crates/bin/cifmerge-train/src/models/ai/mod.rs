pub(crate) mod resnet;
pub(crate) mod schedule;
pub(crate) mod trainer;

pub mod cusum;
pub mod ev;
pub mod momentum;
pub mod regime;

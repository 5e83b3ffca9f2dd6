mod dataset;
mod output;

pub use dataset::{DataSet, RowView};
pub use output::{Output, RecordStream};

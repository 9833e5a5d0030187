pub mod file;
pub mod results;

pub use file::{load_test_list, parse_test_list};
pub use results::{ResultsFile, ResultsSummary, read_results_file};

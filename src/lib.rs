pub mod combiner;

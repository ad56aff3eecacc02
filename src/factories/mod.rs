pub mod advisor_factory;

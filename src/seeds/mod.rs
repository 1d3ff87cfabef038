pub mod plans_seed;

pub mod subscription_sweeper;

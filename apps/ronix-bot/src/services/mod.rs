pub mod locks;
pub mod server_registry;
pub mod subscription_service;
#[cfg(test)]
pub mod testing;

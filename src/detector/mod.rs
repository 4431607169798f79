pub mod model_client;

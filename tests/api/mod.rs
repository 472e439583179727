mod activity_tests;
mod delivery_tests;
mod health_tests;
mod long_polling_tests;
mod multi_session_tests;

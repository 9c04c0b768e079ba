fn main() {
    // Propagate the ESP-IDF link arguments only when building for the target
    #[cfg(feature = "esp-idf")]
    embuild::espidf::sysenv::output();
}

fn main() {
    tracing_subscriber::fmt::init();
    querypal::config::load_dotenv();
    dioxus::launch(querypal::ui::App);
}

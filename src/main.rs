fn main() {
  spotify_supervisor_lib::run()
}

fn main() {
    spatial_radiance_cache::run();
}

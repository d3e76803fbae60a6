fn main() {
    remora::main();
}

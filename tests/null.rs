// -*- indent-tabs-mode: nil; tab-width: 2; -*-
// vim: set ts=&2 sw=2 et ai :

use std::time::Duration;

use rustic_stack::device::null::Null;
use rustic_stack::net::NetStack;
use rustic_stack::parking_lot::Mutex;
use std::sync::Arc;

#[test]
fn null_discards_output() {
  let stack = NetStack::with_idle_interval(Duration::from_millis(1));
  Null::init(&stack).unwrap();

  let received = Arc::new(Mutex::new(0usize));
  let received_2 = received.clone();
  stack.register_protocol(0x0800, move |_, _| *received_2.lock() += 1).unwrap();

  stack.run().unwrap();

  let test_data = [0u8; 8];
  for _ in 0..3 {
    stack.output("null", 0x0800, &test_data, None).unwrap();
  }
  std::thread::sleep(Duration::from_millis(50));

  stack.shutdown().unwrap();
  assert_eq!(*received.lock(), 0);
  assert!(!stack.with_device("null", |dev| dev.is_up()).unwrap());
}

#[test]
fn null_output_after_shutdown_fails() {
  let stack = NetStack::new();
  Null::init(&stack).unwrap();
  stack.run().unwrap();
  stack.shutdown().unwrap();

  assert!(stack.output("null", 0x0800, &[0u8; 8], None).is_err());
}

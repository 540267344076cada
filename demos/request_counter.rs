use aurora::{ConnectionData, Context, Handled, Handler, Server};
use tokio::net::TcpListener;

struct MyHandler;

struct Counter(usize);

impl ConnectionData for Counter {
    fn new() -> Self {
        Counter(0)
    }

    fn reset(&mut self) {
        self.0 = 0;
    }
}

impl Handler<Counter> for MyHandler {
    async fn handle(&self, ctx: &mut Context) -> Handled {
        let counter = ctx.connection_data::<Counter>().unwrap();
        counter.0 += 1;
        let count = counter.0;

        ctx.json(format!(r#"{{"count_request": {count}}}"#)).unwrap()
    }
}

#[tokio::main]
async fn main() {
    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .handler(MyHandler)
        .build()
        .launch()
        .await;
}

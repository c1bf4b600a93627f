use std::net::SocketAddr;

use comms::{
    msg::{Command, Msg, Payload},
    transport::{TcpTransport, Transport},
};
use tokio::{io, net::TcpListener};

#[tokio::test]
async fn send_recv() {
    const SIZE: usize = 128;

    let params = [0.5, -1.0, 3.25];
    let msg = Msg::Data(Payload::Params(&params));

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    tx.send(&msg).await.unwrap();
    tx.send(&Msg::Control(Command::Disconnect)).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);
    let mut buf: Vec<f32> = Vec::new();

    let received: Msg = rx.recv_into(&mut buf).await.unwrap();
    assert_eq!(received, msg);

    let received: Msg = rx.recv_into(&mut buf).await.unwrap();
    assert_eq!(received, Msg::Control(Command::Disconnect));
}

async fn star(world_size: usize) -> Vec<TcpTransport> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    let root = tokio::spawn(TcpTransport::accept(listener, world_size));
    let leaves: Vec<_> = (1..world_size)
        .map(|rank| tokio::spawn(TcpTransport::connect(rank, world_size, addr)))
        .collect();

    let mut transports = vec![root.await.unwrap().unwrap()];
    for leaf in leaves {
        transports.push(leaf.await.unwrap().unwrap());
    }

    transports
}

#[tokio::test(flavor = "multi_thread")]
async fn tcp_star_gathers_and_broadcasts() {
    let transports = star(3).await;
    let [root, one, two] = <[TcpTransport; 3]>::try_from(transports).ok().unwrap();

    assert_eq!((one.rank(), two.rank()), (1, 2));

    let gather = async {
        let (mut a, mut b) = ([0.0; 2], [0.0; 2]);
        root.recv(1, &mut a).await?;
        root.recv(2, &mut b).await?;
        Ok::<_, std::io::Error>([a, b])
    };

    let (gathered, _, _) = tokio::try_join!(
        gather,
        one.send(0, &[1.0, 1.5]),
        two.send(0, &[2.0, 2.5]),
    )
    .unwrap();
    assert_eq!(gathered, [[1.0, 1.5], [2.0, 2.5]]);

    let mut src = [7.0, 8.0];
    let (mut x, mut y) = ([0.0; 2], [0.0; 2]);
    tokio::try_join!(
        root.broadcast(0, &mut src),
        one.broadcast(0, &mut x),
        two.broadcast(0, &mut y),
    )
    .unwrap();
    assert_eq!((x, y), (src, src));

    tokio::try_join!(root.barrier(), one.barrier(), two.barrier()).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn tcp_leaves_cannot_talk_directly() {
    let transports = star(3).await;
    let err = transports[1].send(2, &[1.0]).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
}

#[tokio::test(flavor = "multi_thread")]
async fn tcp_block_length_mismatch_is_an_error() {
    let transports = star(2).await;
    let (root, leaf) = (&transports[0], &transports[1]);

    leaf.send(0, &[1.0, 2.0, 3.0]).await.unwrap();
    let mut block = [0.0; 2];
    let err = root.recv(1, &mut block).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[tokio::test]
async fn batched_frames_arrive_in_order_then_close() {
    let (one, two) = io::duplex(256);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    let (samples, labels) = ([1.0, 2.0], [0.5]);
    let batch = [
        Msg::Data(Payload::Samples(&samples)),
        Msg::Data(Payload::Labels(&labels)),
    ];
    tx.send_all(&batch).await.unwrap();
    drop(tx);

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);
    let mut buf: Vec<f32> = Vec::new();

    let received: Option<Msg> = rx.recv_or_close(&mut buf).await.unwrap();
    assert_eq!(received, Some(Msg::Data(Payload::Samples(&samples))));
    let received: Option<Msg> = rx.recv_or_close(&mut buf).await.unwrap();
    assert_eq!(received, Some(Msg::Data(Payload::Labels(&labels))));
    let received: Option<Msg> = rx.recv_or_close(&mut buf).await.unwrap();
    assert_eq!(received, None);
}
